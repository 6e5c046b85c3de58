pub mod bookmark;
pub mod realtime;
pub mod response;
pub mod user;
