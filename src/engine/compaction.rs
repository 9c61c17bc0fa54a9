use tokio::sync::oneshot;

use crate::model::*;

use super::{Engine, EngineError, WalCommand};

/// Minimal event sequence that rebuilds one ronda.
fn ronda_events(rs: &RondaState, events: &mut Vec<Event>) {
    let ronda_id = rs.id;
    events.push(Event::RondaCreated(RondaDef {
        id: rs.id,
        codigo: rs.codigo,
        nombre: rs.nombre.clone(),
        monto_aporte: rs.monto_aporte,
        ahorro_objetivo: rs.ahorro_objetivo,
        multa: rs.multa,
        fecha_inicio: rs.fecha_inicio,
        intervalo_dias: rs.intervalo_dias,
    }));
    if !rs.participantes.is_empty() {
        events.push(Event::ParticipantsAssigned {
            ronda_id,
            orden: rs.participantes.clone(),
        });
    }
    for (&semana, &socio_id) in &rs.responsables {
        events.push(Event::ResponsableSet { ronda_id, semana, socio_id });
    }

    // Cancelled loans first: each grant is undone right away, so it never
    // shadows an aporte emitted later.
    let (cancelados, vigentes): (Vec<_>, Vec<_>) = rs
        .prestamos
        .values()
        .partition(|p| p.estado == EstadoPrestamo::Cancelado);
    for p in cancelados.into_iter().chain(vigentes) {
        events.push(Event::PrestamoGranted {
            id: p.id,
            ronda_id,
            socio_id: p.socio_id,
            semana: p.semana,
            principal: p.principal,
            interes: p.interes,
            aporte: rs.monto_aporte,
            observaciones: p.observaciones.clone(),
            creado: p.creado,
        });
        match p.estado {
            EstadoPrestamo::Pendiente => {}
            EstadoPrestamo::Pagado => events.push(Event::PrestamoSettled { id: p.id, ronda_id }),
            EstadoPrestamo::Cancelado => events.push(Event::PrestamoCancelled {
                id: p.id,
                ronda_id,
                revertir_aporte: true,
            }),
        }
    }

    for a in rs.aportes.values().filter(|a| a.prestamo_id.is_none()) {
        events.push(Event::AporteRecorded {
            ronda_id,
            socio_id: a.socio_id,
            semana: a.semana,
            monto: a.monto,
            multa: a.multa,
            observaciones: a.observaciones.clone(),
        });
    }
    for a in &rs.ahorros {
        events.push(Event::AhorroRecorded {
            id: a.id,
            ronda_id,
            socio_id: a.socio_id,
            semana: a.semana,
            monto: a.monto,
            fecha: a.fecha,
        });
    }

    for semana in 1..rs.semana_actual {
        events.push(Event::SemanaCerrada {
            ronda_id,
            semana,
            finalizada: false,
            at: rs.fecha_inicio,
        });
    }
    if !rs.activa {
        events.push(Event::SemanaCerrada {
            ronda_id,
            semana: rs.semana_actual,
            finalizada: true,
            at: rs.fecha_fin.unwrap_or(rs.fecha_inicio),
        });
    }
}

impl Engine {
    /// Rewrite the WAL with only the events needed to recreate the current
    /// state. Every lock is held until the writer has swapped the file, so
    /// no append can fall between the snapshot and the swap.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let ledger = self.ledger.lock().await;
        let mut guards = Vec::new();
        for rs in self.ronda_handles() {
            guards.push(rs.read_owned().await);
        }
        guards.sort_by_key(|g| g.codigo);

        let mut events: Vec<Event> = ledger
            .socios
            .values()
            .cloned()
            .map(Event::SocioRegistered)
            .collect();
        for guard in &guards {
            ronda_events(guard, &mut events);
        }
        events.extend(
            ledger
                .movimientos
                .iter()
                .cloned()
                .map(Event::MovimientoLibreRecorded),
        );
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::debug!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
