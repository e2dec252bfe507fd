pub mod database;
pub mod fees;
pub mod metrics;
pub mod notifications;
pub mod processor;
pub mod stripe;

pub use database::{Database, DueWindow, PaymentStore, SettleOutcome};
pub use metrics::{get_metrics, init_metrics};
pub use notifications::{EmailSender, MockMailer, Notifier, SmtpMailer};
pub use processor::{BatchSummary, PreviewSummary, RentPaymentProcessor, RunKind};
pub use stripe::StripeClient;
