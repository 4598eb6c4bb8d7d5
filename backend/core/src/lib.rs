pub mod error;
pub mod traits;
pub mod types;

pub use error::SignalError;
pub use traits::SignalSource;
pub use types::{
    CoincidentSignals, ConfirmingSignals, LeadingSignals, ProgramSignal, ProtocolVolume,
    RepoSignal, Report, ReportAnomaly, SignalFamily, SignalSet, TokenSignal,
};
