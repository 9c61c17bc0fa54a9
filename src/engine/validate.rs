use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

pub(crate) fn check_positive(amount: Cents, what: &'static str) -> Result<(), EngineError> {
    if amount <= 0 {
        return Err(EngineError::InvalidAmount(what));
    }
    check_range(amount)
}

pub(crate) fn check_non_negative(amount: Cents, what: &'static str) -> Result<(), EngineError> {
    if amount < 0 {
        return Err(EngineError::InvalidAmount(what));
    }
    check_range(amount)
}

fn check_range(amount: Cents) -> Result<(), EngineError> {
    if amount > MAX_AMOUNT_CENTS {
        return Err(EngineError::LimitExceeded("amount too large"));
    }
    Ok(())
}

pub(crate) fn check_name(value: &str, what: &'static str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidField(format!("{what} must not be empty")));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

/// Dates are Unix milliseconds between the epoch and the end of year 9999.
pub(crate) fn check_fecha(fecha: Ms, what: &'static str) -> Result<(), EngineError> {
    if !(0..=MAX_FECHA_MS).contains(&fecha) {
        return Err(EngineError::InvalidField(format!("{what} out of range: {fecha}")));
    }
    Ok(())
}

pub(crate) fn check_edad(edad: Option<u32>) -> Result<(), EngineError> {
    match edad {
        Some(e) if e > MAX_EDAD => Err(EngineError::InvalidField(format!("edad out of range: {e}"))),
        _ => Ok(()),
    }
}

pub(crate) fn check_observaciones(obs: &Option<String>) -> Result<(), EngineError> {
    if let Some(o) = obs
        && o.len() > MAX_OBSERVACIONES_LEN
    {
        return Err(EngineError::LimitExceeded("observaciones too long"));
    }
    Ok(())
}

/// Movements can be booked on the running week or any earlier one.
pub(crate) fn check_open_week(rs: &RondaState, semana: u32) -> Result<(), EngineError> {
    if semana == 0 || semana > rs.semana_actual {
        return Err(EngineError::InvalidWeek {
            semana,
            max: rs.semana_actual,
        });
    }
    Ok(())
}

pub(crate) fn check_active(rs: &RondaState) -> Result<(), EngineError> {
    if !rs.activa {
        return Err(EngineError::RondaInactiva(rs.id));
    }
    Ok(())
}

pub(crate) fn check_participant(rs: &RondaState, socio_id: &ulid::Ulid) -> Result<(), EngineError> {
    if !rs.is_participant(socio_id) {
        return Err(EngineError::NotParticipant {
            ronda_id: rs.id,
            socio_id: *socio_id,
        });
    }
    Ok(())
}
