use ulid::Ulid;

use crate::model::*;
use crate::observability::{RONDAS_FINISHED_TOTAL, WEEKS_CLOSED_TOTAL};

use super::validate::*;
use super::{Engine, EngineError};

impl Engine {
    /// Close the running week once every participant has paid it. The last
    /// week ends the ronda; any other moves it to the next week.
    pub async fn cerrar_semana(&self, ronda_id: Ulid) -> Result<CierreSemana, EngineError> {
        let mut ledger = self.ledger.lock().await;
        let mut guard = self.ronda_write(&ronda_id).await?;
        check_active(&guard)?;
        if guard.participantes.is_empty() {
            return Err(EngineError::InvalidRoster("ronda has no participants yet".into()));
        }

        let semana = guard.semana_actual;
        let pendientes = guard.pendientes(semana);
        if !pendientes.is_empty() {
            tracing::debug!(
                "ronda {ronda_id}: week {semana} stays open, {} unpaid",
                pendientes.len()
            );
            let pendientes = pendientes
                .into_iter()
                .map(|socio_id| PendienteInfo {
                    socio_id,
                    monto_aporte: guard.monto_aporte,
                    multa: guard.multa,
                })
                .collect();
            return Ok(CierreSemana::Pendiente { semana, pendientes });
        }

        let finalizada = semana + 1 > guard.duracion();
        let event = Event::SemanaCerrada {
            ronda_id,
            semana,
            finalizada,
            at: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        ledger.apply(&event);
        metrics::counter!(WEEKS_CLOSED_TOTAL).increment(1);

        if finalizada {
            metrics::counter!(RONDAS_FINISHED_TOTAL).increment(1);
            tracing::info!("ronda {ronda_id} finished after week {semana}");
            Ok(CierreSemana::Finalizada { semana })
        } else {
            tracing::info!("ronda {ronda_id}: week {semana} closed");
            Ok(CierreSemana::Avanzada {
                semana,
                siguiente: semana + 1,
            })
        }
    }
}
