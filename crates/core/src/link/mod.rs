//! Link resolution
//!
//! Everything that happens between a user clicking an emailed link and the
//! flow having a session: classification, URL scrubbing, `next` sanitizing,
//! bounded session polling and resend throttling.

mod classify;
mod poll;
mod redirect;
mod resolver;
mod throttle;

pub use classify::{
    bridge_location, classify_incoming_url, relative_path, scrub_url, ArtifactKind,
    BridgeCredentials, OtpToken, TokenPair, BRIDGE_PATH,
};
pub use poll::{
    PollConfig, PollHandle, PollOutcome, SessionPoller, SessionProbe, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_POLL_DELAY,
};
pub use redirect::{sanitize_next, DEFAULT_NEXT};
pub use resolver::{describe_link_error, next_step, FlowStep, LandingContext, LinkResolver, Resolution};
pub use throttle::{ResendThrottle, DEFAULT_RESEND_INTERVAL};
