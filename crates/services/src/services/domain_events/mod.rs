mod delivery_log;
mod dispatcher;
mod executor;
mod handler;
pub mod handlers;
mod metadata;
mod registry;
mod types;

pub use delivery_log::{DeliveryFailure, DeliveryFailureStore};
pub use dispatcher::{DispatchError, DispatcherBuilder, EventDispatcher, global, install_global};
pub use executor::{BackgroundExecutor, ExecutorError};
pub use handler::{EventHandler, HandlerContext, HandlerError};
pub use handlers::{ArtifactPullHandler, AutoScanHandler, RequestMailHandler, WebhookJobHandler};
pub use metadata::{
    ApproveRequestMetadata, EventMetadata, PullArtifactMetadata, PushArtifactMetadata,
    RejectRequestMetadata,
};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder, RegisteredHandler};
pub use types::{
    Artifact, ArtifactEvent, DomainEvent, HookEvent, HookTarget, RequestEvent, topics,
};
