//! Extension-side contexts of identity-relay.
//!
//! - **Controller**: [`ExtensionController`], the single dispatch point for
//!   relay requests and the trust boundary for web app notifications
//! - **Lifecycle**: [`OffscreenLifecycle`], create-once/close-after-use
//!   ownership of the offscreen document
//! - **Offscreen host**: [`OffscreenHost`], which embeds the relay page and
//!   correlates its replies
//! - **Popup**: [`PopupUi`], the view model behind the toolbar popup
//! - **Storage**: [`KeyValueStore`] and the typed [`ProfileCache`]

pub mod config;
pub mod controller;
pub mod lifecycle;
pub mod offscreen;
pub mod platform;
pub mod popup;
pub mod storage;

pub use config::ExtensionConfig;
pub use controller::{ExtensionController, RelayDispatch};
pub use lifecycle::{OffscreenLease, OffscreenLifecycle};
pub use offscreen::{OffscreenClient, OffscreenHost};
pub use platform::{LocalOffscreenPlatform, OffscreenDocument, OffscreenPlatform, RelayFrameFactory};
pub use popup::{PopupAction, PopupUi, PopupView, TabOpenError, TabOpener};
pub use storage::{DEFAULT_PROFILE_KEY, JsonFileStore, KeyValueStore, MemoryStore, ProfileCache};
