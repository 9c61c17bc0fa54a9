mod compaction;
mod error;
mod ledger;
mod mutations;
mod prestamos;
mod queries;
mod settlement;
mod validate;
#[cfg(test)]
mod tests;

pub use error::EngineError;
pub use ledger::Ledger;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRondaState = Arc<RwLock<RondaState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// Blocks for the first append, drains whatever else is already queued,
/// then does a single fsync for the whole batch before acknowledging it.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;

        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        commit_batch(&mut wal, &mut batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so partially buffered bytes don't
    // leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// One association's books: members, rondas and free savings, rebuilt from
/// the WAL at startup and mutated only through validated events.
pub struct Engine {
    pub(super) rondas: DashMap<Ulid, SharedRondaState>,
    /// Lock order: `ledger` before any ronda lock.
    pub(super) ledger: Mutex<Ledger>,
    /// Reverse lookup: prestamo id → ronda id
    pub(super) prestamo_to_ronda: DashMap<Ulid, Ulid>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
}

/// Apply a ronda-scoped event (no locking — caller holds the lock).
pub(super) fn apply_to_ronda(rs: &mut RondaState, event: &Event, prestamo_index: &DashMap<Ulid, Ulid>) {
    match event {
        Event::ParticipantsAssigned { orden, .. } => {
            rs.participantes = orden.clone();
            let n = orden.len() as u32;
            rs.responsables
                .retain(|semana, socio| *semana <= n && orden.contains(socio));
            rs.fecha_fin = Some(rs.fecha_fin_planificada());
        }
        Event::RotationReordered { orden, .. } => {
            rs.participantes = orden.clone();
            rs.fecha_fin = Some(rs.fecha_fin_planificada());
        }
        Event::ResponsableSet { semana, socio_id, .. } => {
            rs.responsables.insert(*semana, *socio_id);
        }
        Event::AporteRecorded {
            socio_id,
            semana,
            monto,
            multa,
            observaciones,
            ..
        } => {
            rs.aportes.insert(
                (*semana, *socio_id),
                Aporte {
                    socio_id: *socio_id,
                    semana: *semana,
                    monto: *monto,
                    multa: *multa,
                    prestamo_id: None,
                    observaciones: observaciones.clone(),
                },
            );
        }
        Event::AhorroRecorded {
            id,
            socio_id,
            semana,
            monto,
            fecha,
            ..
        } => {
            rs.ahorros.push(Ahorro {
                id: *id,
                socio_id: *socio_id,
                semana: *semana,
                monto: *monto,
                fecha: *fecha,
            });
        }
        Event::PrestamoGranted {
            id,
            ronda_id,
            socio_id,
            semana,
            principal,
            interes,
            aporte,
            observaciones,
            creado,
        } => {
            rs.prestamos.insert(
                *id,
                PrestamoExpress {
                    id: *id,
                    ronda_id: *ronda_id,
                    socio_id: *socio_id,
                    semana: *semana,
                    principal: *principal,
                    interes: *interes,
                    estado: EstadoPrestamo::Pendiente,
                    observaciones: observaciones.clone(),
                    creado: *creado,
                },
            );
            rs.aportes.insert(
                (*semana, *socio_id),
                Aporte {
                    socio_id: *socio_id,
                    semana: *semana,
                    monto: *aporte,
                    multa: 0,
                    prestamo_id: Some(*id),
                    observaciones: observaciones.clone(),
                },
            );
            prestamo_index.insert(*id, *ronda_id);
        }
        Event::PrestamoSettled { id, .. } => {
            if let Some(p) = rs.prestamos.get_mut(id) {
                p.estado = EstadoPrestamo::Pagado;
            }
        }
        Event::PrestamoCancelled {
            id,
            revertir_aporte,
            ..
        } => {
            let Some(p) = rs.prestamos.get_mut(id) else {
                return;
            };
            p.estado = EstadoPrestamo::Cancelado;
            let key = (p.semana, p.socio_id);
            let linked = rs
                .aportes
                .get(&key)
                .is_some_and(|a| a.prestamo_id == Some(*id));
            if linked {
                if *revertir_aporte {
                    rs.aportes.remove(&key);
                } else if let Some(a) = rs.aportes.get_mut(&key) {
                    a.prestamo_id = None;
                }
            }
        }
        Event::SemanaCerrada {
            semana,
            finalizada,
            at,
            ..
        } => {
            if *finalizada {
                rs.activa = false;
                rs.fecha_fin = Some(*at);
            } else {
                rs.semana_actual = semana + 1;
            }
        }
        // Handled at the engine/ledger level, not here
        Event::RondaCreated(_) | Event::SocioRegistered(_) | Event::MovimientoLibreRecorded(_) => {}
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let rondas: DashMap<Ulid, SharedRondaState> = DashMap::new();
        let prestamo_to_ronda = DashMap::new();
        let mut ledger = Ledger::default();

        // Replay — we're the sole owner of these Arcs, so try_write always
        // succeeds instantly. Never use blocking_write here: this may run
        // inside an async context (lazy tenant creation).
        for event in &events {
            if let Event::RondaCreated(def) = event {
                rondas.insert(def.id, Arc::new(RwLock::new(RondaState::new(def.clone()))));
            } else if let Some(ronda_id) = event.ronda_id()
                && let Some(entry) = rondas.get(&ronda_id)
            {
                let rs = entry.value().clone();
                drop(entry);
                let mut guard = rs.try_write().expect("replay: uncontended write");
                apply_to_ronda(&mut guard, event, &prestamo_to_ronda);
            }
            ledger.apply(event);
        }

        if !events.is_empty() {
            tracing::info!(
                "replayed {} events from {}: {} socios, {} rondas",
                events.len(),
                wal_path.display(),
                ledger.socios.len(),
                rondas.len()
            );
        }

        Ok(Self {
            rondas,
            ledger: Mutex::new(ledger),
            prestamo_to_ronda,
            wal_tx,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_ronda(&self, id: &Ulid) -> Option<SharedRondaState> {
        self.rondas.get(id).map(|e| e.value().clone())
    }

    pub fn get_ronda_for_prestamo(&self, prestamo_id: &Ulid) -> Option<Ulid> {
        self.prestamo_to_ronda.get(prestamo_id).map(|e| *e.value())
    }

    /// Snapshot of every ronda handle, so no DashMap guard is held across an await.
    pub(super) fn ronda_handles(&self) -> Vec<SharedRondaState> {
        self.rondas.iter().map(|e| e.value().clone()).collect()
    }

    /// WAL-append + apply for a ronda-scoped event.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut RondaState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_ronda(rs, event, &self.prestamo_to_ronda);
        Ok(())
    }

    /// WAL-append + apply for a ledger-scoped event.
    pub(super) async fn persist_and_apply_ledger(
        &self,
        ledger: &mut Ledger,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        ledger.apply(event);
        Ok(())
    }

    /// Lookup prestamo → ronda, get ronda, acquire write lock.
    pub(super) async fn resolve_prestamo_write(
        &self,
        prestamo_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<RondaState>, EngineError> {
        let ronda_id = self
            .get_ronda_for_prestamo(prestamo_id)
            .ok_or(EngineError::NotFound(*prestamo_id))?;
        let rs = self
            .get_ronda(&ronda_id)
            .ok_or(EngineError::NotFound(ronda_id))?;
        Ok(rs.write_owned().await)
    }

    /// Acquire the write lock of a ronda.
    pub(super) async fn ronda_write(
        &self,
        ronda_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<RondaState>, EngineError> {
        let rs = self
            .get_ronda(ronda_id)
            .ok_or(EngineError::NotFound(*ronda_id))?;
        Ok(rs.write_owned().await)
    }

    pub(super) async fn ronda_read(
        &self,
        ronda_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockReadGuard<RondaState>, EngineError> {
        let rs = self
            .get_ronda(ronda_id)
            .ok_or(EngineError::NotFound(*ronda_id))?;
        Ok(rs.read_owned().await)
    }
}
