use ulid::Ulid;

use crate::model::{Cents, EstadoPrestamo};
use crate::money::format_cents;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Unique field collision: `(field, value)`.
    Duplicate(&'static str, String),
    /// Another ronda is still running.
    RondaActiva(Ulid),
    RondaInactiva(Ulid),
    NotParticipant {
        ronda_id: Ulid,
        socio_id: Ulid,
    },
    InvalidWeek {
        semana: u32,
        max: u32,
    },
    InvalidAmount(&'static str),
    InvalidRoster(String),
    InvalidField(String),
    /// The roster can no longer be replaced.
    RosterLocked(Ulid),
    AlreadyPaid {
        socio_id: Ulid,
        semana: u32,
    },
    AhorroCap {
        restante: Cents,
    },
    AhorroRepeated {
        socio_id: Ulid,
        semana: u32,
    },
    InsufficientBalance {
        saldo: Cents,
    },
    /// The aporte was paid by this express loan.
    LoanBacked(Ulid),
    InvalidTransition {
        id: Ulid,
        from: EstadoPrestamo,
        to: EstadoPrestamo,
    },
    WeekClosed(u32),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::Duplicate(field, value) => write!(f, "duplicate {field}: {value}"),
            EngineError::RondaActiva(id) => write!(f, "ronda {id} is still active"),
            EngineError::RondaInactiva(id) => write!(f, "ronda {id} is not active"),
            EngineError::NotParticipant { ronda_id, socio_id } => {
                write!(f, "socio {socio_id} does not belong to ronda {ronda_id}")
            }
            EngineError::InvalidWeek { semana, max } => {
                write!(f, "week {semana} out of range 1..={max}")
            }
            EngineError::InvalidAmount(msg) => write!(f, "invalid amount: {msg}"),
            EngineError::InvalidRoster(msg) => write!(f, "invalid roster: {msg}"),
            EngineError::InvalidField(msg) => write!(f, "invalid field: {msg}"),
            EngineError::RosterLocked(id) => {
                write!(f, "ronda {id} already has movements; roster cannot be replaced")
            }
            EngineError::AlreadyPaid { socio_id, semana } => {
                write!(f, "socio {socio_id} already paid week {semana}")
            }
            EngineError::AhorroCap { restante } => {
                write!(f, "savings cap reached: at most {} left this ronda", format_cents(*restante))
            }
            EngineError::AhorroRepeated { socio_id, semana } => {
                write!(f, "socio {socio_id} already saved in week {semana}")
            }
            EngineError::InsufficientBalance { saldo } => {
                write!(f, "amount exceeds available balance ({})", format_cents(*saldo))
            }
            EngineError::LoanBacked(id) => {
                write!(f, "aporte is covered by express loan {id}; cancel the loan first")
            }
            EngineError::InvalidTransition { id, from, to } => {
                write!(f, "prestamo {id}: cannot go from {} to {}", from.as_str(), to.as_str())
            }
            EngineError::WeekClosed(semana) => write!(f, "week {semana} is already closed"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
