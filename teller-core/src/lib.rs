//! Teller Core - ledger and transfer engine for a small retail bank
//!
//! This crate implements the core domain logic following hexagonal architecture:
//!
//! - **domain**: Core business entities (Account, Transaction, Receipt, etc.)
//! - **ports**: Trait definitions for external dependencies (Clock, NotificationSender)
//! - **services**: Business logic orchestration (transfers, OTP, admin tools)
//! - **adapters**: Concrete implementations (DuckDB, file outbox, clocks)

pub mod adapters;
pub mod config;
pub mod domain;
pub mod log_migrations;
pub mod migrations;
pub mod ports;
pub mod services;

use std::path::Path;
use std::sync::Arc;

use adapters::duckdb::DuckDbRepository;
use adapters::{OutboxNotifier, SystemClock};
use config::Config;
use ports::{Clock, NotificationSender};
use services::*;

// Re-export commonly used types at crate root
pub use domain::result::{Error, ErrorClass, OperationResult, Result};
pub use domain::{Account, Identity, Receipt, Transaction, User};
pub use services::{EntryPoint, LogEvent, LoggingService};

pub const LEDGER_DB: &str = "ledger.duckdb";

/// Main context for Teller operations
///
/// This is the primary entry point for all business logic. It holds
/// the database connection, configuration, and all services.
pub struct TellerContext {
    pub config: Config,
    pub repository: Arc<DuckDbRepository>,
    pub otp_service: Arc<OtpService>,
    pub transfer_service: TransferService,
    pub admin_service: AdminService,
    pub user_service: UserService,
    pub summary_service: SummaryService,
    pub status_service: StatusService,
    pub statement_service: StatementService,
    pub doctor_service: DoctorService,
    pub logging_service: Option<Arc<LoggingService>>,
}

impl TellerContext {
    /// Open the ledger in `teller_dir`, delivering mail to its outbox
    pub fn new(teller_dir: &Path, entry_point: EntryPoint) -> Result<Self> {
        std::fs::create_dir_all(teller_dir)?;
        let config = Config::load(teller_dir)?;

        let repository = Arc::new(DuckDbRepository::new(&teller_dir.join(LEDGER_DB))?);
        repository.ensure_schema()?;

        let notifier = Arc::new(OutboxNotifier::new(config.outbox_dir(teller_dir)));

        // The event log is diagnostic; a broken logs.duckdb must not stop the bank
        let events = match LoggingService::new(teller_dir, entry_point, env!("CARGO_PKG_VERSION")) {
            Ok(service) => Some(Arc::new(service)),
            Err(e) => {
                log::warn!("Event log unavailable: {}", e);
                None
            }
        };

        Ok(Self::with_parts(
            repository,
            config,
            notifier,
            Arc::new(SystemClock),
            events,
        ))
    }

    /// Wire the services over explicit adapters
    pub fn with_parts(
        repository: Arc<DuckDbRepository>,
        config: Config,
        notifier: Arc<dyn NotificationSender>,
        clock: Arc<dyn Clock>,
        events: Option<Arc<LoggingService>>,
    ) -> Self {
        let otp_service = Arc::new(OtpService::new(
            Arc::clone(&repository),
            Arc::clone(&notifier),
            Arc::clone(&clock),
            &config.otp,
        ));

        let mut transfer_service = TransferService::new(
            Arc::clone(&repository),
            Arc::clone(&otp_service),
            notifier,
            Arc::clone(&clock),
            config.otp.clone(),
        );
        let mut admin_service = AdminService::new(Arc::clone(&repository), Arc::clone(&clock));
        if let Some(events) = &events {
            transfer_service = transfer_service.with_event_log(Arc::clone(events));
            admin_service = admin_service.with_event_log(Arc::clone(events));
        }

        let user_service = UserService::new(
            Arc::clone(&repository),
            Arc::clone(&clock),
            config.password_hash,
            config.default_currency.clone(),
        );
        let summary_service = SummaryService::new(Arc::clone(&repository));
        let status_service = StatusService::new(Arc::clone(&repository));
        let statement_service = StatementService::new(Arc::clone(&repository));
        let doctor_service = DoctorService::new(Arc::clone(&repository), clock);

        Self {
            config,
            repository,
            otp_service,
            transfer_service,
            admin_service,
            user_service,
            summary_service,
            status_service,
            statement_service,
            doctor_service,
            logging_service: events,
        }
    }
}
