use ulid::Ulid;

use crate::model::*;

use super::validate::*;
use super::{Engine, EngineError};

impl Engine {
    /// Lend a member the week's contribution. The loan and the aporte it pays
    /// are one event, so neither exists without the other.
    #[allow(clippy::too_many_arguments)]
    pub async fn grant_prestamo(
        &self,
        id: Ulid,
        ronda_id: Ulid,
        socio_id: Ulid,
        semana: u32,
        principal: Cents,
        interes: Cents,
        observaciones: Option<String>,
    ) -> Result<(), EngineError> {
        check_non_negative(principal, "principal must not be negative")?;
        check_non_negative(interes, "interes must not be negative")?;
        check_observaciones(&observaciones)?;
        if self.prestamo_to_ronda.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let mut guard = self.ronda_write(&ronda_id).await?;
        check_active(&guard)?;
        check_participant(&guard, &socio_id)?;
        check_open_week(&guard, semana)?;
        if guard.prestamos.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.aporte(semana, &socio_id).is_some() {
            return Err(EngineError::AlreadyPaid { socio_id, semana });
        }

        let event = Event::PrestamoGranted {
            id,
            ronda_id,
            socio_id,
            semana,
            principal,
            interes,
            aporte: guard.monto_aporte,
            observaciones,
            creado: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!("prestamo {id} granted to {socio_id} for week {semana} of ronda {ronda_id}");
        Ok(())
    }

    pub async fn settle_prestamo(&self, id: Ulid) -> Result<Ulid, EngineError> {
        let mut guard = self.resolve_prestamo_write(&id).await?;
        pending_loan(&guard, id, EstadoPrestamo::Pagado)?;

        let ronda_id = guard.id;
        let event = Event::PrestamoSettled { id, ronda_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(ronda_id)
    }

    /// Cancel a pending loan. With `revertir_aporte` the aporte it paid is
    /// removed again, which is only possible while its week is still open.
    pub async fn cancel_prestamo(&self, id: Ulid, revertir_aporte: bool) -> Result<Ulid, EngineError> {
        let mut guard = self.resolve_prestamo_write(&id).await?;
        let semana = pending_loan(&guard, id, EstadoPrestamo::Cancelado)?;
        if revertir_aporte && (!guard.activa || semana < guard.semana_actual) {
            return Err(EngineError::WeekClosed(semana));
        }

        let ronda_id = guard.id;
        let event = Event::PrestamoCancelled {
            id,
            ronda_id,
            revertir_aporte,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(ronda_id)
    }
}

/// The loan must still be pending; returns its week.
fn pending_loan(rs: &RondaState, id: Ulid, to: EstadoPrestamo) -> Result<u32, EngineError> {
    let p = rs.prestamos.get(&id).ok_or(EngineError::NotFound(id))?;
    if p.estado != EstadoPrestamo::Pendiente {
        return Err(EngineError::InvalidTransition {
            id,
            from: p.estado,
            to,
        });
    }
    Ok(p.semana)
}
