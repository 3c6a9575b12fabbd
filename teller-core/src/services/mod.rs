//! Service layer - business logic orchestration
//!
//! Services coordinate domain logic and port interactions. Each service
//! focuses on a specific use case or feature area.

mod admin;
mod doctor;
pub mod logging;
pub mod migration;
mod otp;
pub mod recorder;
mod statement;
mod status;
mod summary;
mod transfer;
mod user;

pub use admin::{AdminService, ReconcileReport};
pub use doctor::{CheckResult, CheckStatus, DoctorResult, DoctorService, DoctorSummary};
pub use logging::{EntryPoint, LogEntry, LogEvent, LoggingService};
pub use migration::{MigrationResult, MigrationService};
pub use otp::{OtpService, OTP_SUBJECT};
pub use recorder::{NewTransaction, TransactionRecorder};
pub use statement::StatementService;
pub use status::{AccountLine, StatusService, StatusSummary};
pub use summary::{SummaryRebuild, SummaryService};
pub use transfer::{ReferenceStatus, TransferService};
pub use user::UserService;
