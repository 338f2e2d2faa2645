pub mod daemon;
pub mod env_scrub;
pub mod error;
pub mod health;
pub mod http_pool;
pub mod natural_sort;
pub mod path;
pub mod policy;
pub mod remote_client;
pub mod router;

pub use daemon::{DaemonState, DaemonSupervisor};
pub use error::StorageError;
pub use health::{RemoteStatus, RemoteStatusSnapshot};
pub use http_pool::DaemonClientPool;
pub use policy::UploadGroupPolicy;
pub use remote_client::RcloneClient;
pub use router::{LoadBalancingStrategy, StorageGroupRouter};
