mod local_dir;
mod version_log;

pub use local_dir::LocalDirStore;
