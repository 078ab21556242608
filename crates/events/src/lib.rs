//! Notification delivery for form approval workflows.
//!
//! - [`messages`]: renders every outbound message (received, approval
//!   request, reminder, escalation, outcome, digest).
//! - [`delivery`]: the [`Mailer`] capability with an SMTP implementation and
//!   a log-only one for deployments without SMTP.
//! - [`queue`]: the [`NotificationQueue`] capability backing digests.
//! - [`NotificationScheduler`]: decides per workflow cadence whether a
//!   notification goes out now or waits for a digest.
//! - [`DigestDispatcher`]: periodic loop that flushes due digests.

pub mod delivery;
pub mod digest;
pub mod messages;
pub mod queue;
pub mod scheduler;

pub use delivery::email::{EmailConfig, SmtpMailer};
pub use delivery::{DeliveryError, LogMailer, Mailer};
pub use digest::{DigestDispatcher, DigestReport};
pub use messages::{LinkBuilder, MessageRenderer, OutboundMessage};
pub use queue::{NotificationQueue, PgNotificationQueue};
pub use scheduler::{DispatchReport, NotificationScheduler};
