mod hook;
pub mod process;
mod remote_guard;
mod result_file;
mod ssh;

pub use hook::{EXIT_NOT_FOUND, HookProvisioner};
pub use remote_guard::RemoteMarkerGuard;
pub use result_file::JsonResultWriter;
pub use ssh::SshRunner;
