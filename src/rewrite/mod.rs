//! HTML rewriting module
//!
//! Turns upstream documents into relay-local ones: every URL reference found
//! in the markup is resolved to an absolute URL and then pointed back at the
//! relay's own /proxy endpoint, so navigation never leaves this origin.

mod html;
mod resolve;

pub use html::{escape_html, inject_banner, rewrite_html};
pub use resolve::{absolutize, relay_path};
