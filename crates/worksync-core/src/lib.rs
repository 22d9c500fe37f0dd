pub mod config;
pub mod connectivity;
pub mod error;
pub mod executor;
pub mod model;
pub mod queue;
pub mod remote;
pub mod service;
pub mod status;
pub mod sync;

// Re-export commonly used types
pub use config::Config;
pub use connectivity::ConnectivityMonitor;
pub use error::{RemoteWriteError, StorageError, SyncNowError};
pub use executor::OperationExecutor;
pub use model::{OperationDraft, OperationKind, PendingOperation};
pub use queue::QueueStore;
pub use remote::{HttpRemote, MemoryRemote, RemoteStore};
pub use service::{CollectionHandle, IngestReport, OfflineService, PreloadReport};
pub use status::{StatusBus, StatusEvent, StatusSubscription};
pub use sync::{DrainOutcome, SyncOrchestrator, SyncReport};
