pub mod html;
pub mod middleware;
pub mod pkce;
pub mod serde_helpers;
pub mod validation;
