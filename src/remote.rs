mod filesystem;
mod rclone;
mod traits;
mod url;

pub use filesystem::FilesystemRemote;
pub use rclone::RcloneRemote;
pub use traits::{RemoteSnapshot, ARCHIVE_NAME, LISTING_NAME};
pub use url::RemoteUrl;
