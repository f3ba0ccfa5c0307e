// Public modules
pub mod auth;
pub mod config;
pub mod entitlement;
pub mod error;
pub mod markdown;
pub mod page;
pub mod render;
pub mod sse;
pub mod stream;
pub mod transport;

mod observability;

// Re-exports
pub use auth::{EnvToken, FileToken, StaticToken, TokenSource};
pub use config::{IdeaArgs, IdeaConfig, TokenSetting};
pub use entitlement::{Account, ClaimsEntitlements, Entitlements, PricingTier, StaticEntitlements};
pub use error::{Error, Result};
pub use markdown::{MarkdownStyle, render_markdown};
pub use observability::register_biometrics;
pub use page::{Page, PageView, ResolvedPage};
pub use render::{PlainTextRenderer, Renderer};
pub use sse::{Frame, StreamEvent};
pub use stream::{ConnectionState, IdeaStream, Outcome, ReconnectPolicy, View};
pub use transport::{FrameStream, HttpTransport, OpenRequest, Transport};
