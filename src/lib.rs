/// Settings loading: defaults, config file, `VMQ_ZEROMQ_*` environment.
pub mod config;
/// Flexible logging (formatting, filters, sinks).
pub mod logging;
/// Subscription proxy: XSUB/XPUB forwarding, signature checks, rewriting.
pub mod proxy;
/// Publishing: messages, buffering publisher, publisher registry.
pub mod pubsub;
/// Shutdown token and kill switch for OS signals and panics.
pub mod shutdown;
/// TCP transport: PUB/SUB/XPUB/XSUB sockets and the multipart codec.
pub mod transport;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Settings.
pub use config::Settings;
/// Proxy node and signature checking.
pub use proxy::{
    AllowAll, DenyAll, FnChecker, HmacSignatureChecker, ProxyConfig, ProxyNode, ProxyStats,
    RewriteMarker, SignatureChecker, SubscriptionEnvelope,
};
/// Publishing API.
pub use pubsub::{
    BufferingPublisher, DrainOrder, Message, PublisherOptions, PublisherRegistry, PublisherStats,
};
/// Shutdown.
pub use shutdown::{Closeable, KillSwitch, ShutdownController, ShutdownToken};
/// Transport.
pub use transport::{Address, CloseMode, Multipart, Socket, SocketEvent, SocketOptions, SocketType};
/// Operation errors.
pub use zumq_error::{
    AuthError, CodecError, ControlError, ErrorExt, ProxyError, StatusCode, TransportError,
};
