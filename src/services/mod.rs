pub mod backend;
pub mod memory;
pub mod supabase;
pub mod realtime;
pub mod auth;
pub mod bookmark;
pub mod dashboard;

// 重新导出常用类型
pub use backend::{Backend, ChangeFeed};
pub use memory::InMemoryBackend;
pub use supabase::SupabaseBackend;
pub use auth::AuthService;
pub use bookmark::BookmarkService;
pub use dashboard::Dashboard;
