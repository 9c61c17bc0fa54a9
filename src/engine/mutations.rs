use std::collections::HashSet;
use std::sync::Arc;

use rand::seq::SliceRandom;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::validate::*;
use super::{Engine, EngineError};

impl Engine {
    pub async fn create_socio(&self, socio: Socio) -> Result<(), EngineError> {
        check_name(&socio.numero_cuenta, "numero_cuenta")?;
        check_name(&socio.cedula, "cedula")?;
        check_name(&socio.nombres, "nombres")?;
        check_name(&socio.apellidos, "apellidos")?;
        check_edad(socio.edad)?;

        let mut ledger = self.ledger.lock().await;
        if ledger.socios.len() >= MAX_SOCIOS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many socios"));
        }
        if ledger.socios.contains_key(&socio.id) {
            return Err(EngineError::AlreadyExists(socio.id));
        }
        if let Some((field, value)) = ledger.duplicate_key(&socio) {
            return Err(EngineError::Duplicate(field, value));
        }

        let event = Event::SocioRegistered(socio);
        self.persist_and_apply_ledger(&mut ledger, &event).await
    }

    /// Open a new ronda and return its code.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_ronda(
        &self,
        id: Ulid,
        nombre: String,
        monto_aporte: Cents,
        fecha_inicio: Ms,
        ahorro_objetivo: Option<Cents>,
        intervalo_dias: Option<u32>,
        multa: Option<Cents>,
    ) -> Result<String, EngineError> {
        check_name(&nombre, "nombre")?;
        check_positive(monto_aporte, "monto_aporte must be positive")?;
        check_fecha(fecha_inicio, "fecha_inicio")?;
        let ahorro_objetivo = ahorro_objetivo.unwrap_or(0);
        check_non_negative(ahorro_objetivo, "ahorro_objetivo must not be negative")?;
        let multa = multa.unwrap_or(DEFAULT_MULTA_CENTS);
        check_non_negative(multa, "multa must not be negative")?;
        let intervalo_dias = intervalo_dias.unwrap_or(DEFAULT_INTERVALO_DIAS);
        if intervalo_dias == 0 || intervalo_dias > MAX_INTERVALO_DIAS {
            return Err(EngineError::LimitExceeded("intervalo_dias out of range"));
        }

        let mut ledger = self.ledger.lock().await;
        if let Some(activa) = ledger.activa {
            return Err(EngineError::RondaActiva(activa));
        }
        if self.rondas.len() >= MAX_RONDAS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rondas"));
        }
        if self.rondas.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let def = RondaDef {
            id,
            codigo: ledger.next_codigo,
            nombre,
            monto_aporte,
            ahorro_objetivo,
            multa,
            fecha_inicio,
            intervalo_dias,
        };
        let codigo = format_codigo(def.codigo);
        let event = Event::RondaCreated(def.clone());
        self.persist_and_apply_ledger(&mut ledger, &event).await?;
        self.rondas
            .insert(id, Arc::new(RwLock::new(RondaState::new(def))));

        tracing::info!("ronda {codigo} ({id}) created");
        Ok(codigo)
    }

    /// Define the roster. With `orden` on every row the rotation is taken as
    /// given; with none the order is drawn at random.
    pub async fn assign_participants(
        &self,
        ronda_id: Ulid,
        rows: Vec<(Ulid, Option<u32>)>,
    ) -> Result<Vec<Ulid>, EngineError> {
        let n = rows.len();
        if n < MIN_PARTICIPANTS {
            return Err(EngineError::InvalidRoster(format!(
                "at least {MIN_PARTICIPANTS} participants required"
            )));
        }
        if n > MAX_PARTICIPANTS {
            return Err(EngineError::LimitExceeded("too many participants"));
        }
        let mut seen = HashSet::with_capacity(n);
        for (socio_id, _) in &rows {
            if !seen.insert(*socio_id) {
                return Err(EngineError::InvalidRoster(format!("socio {socio_id} listed twice")));
            }
        }

        {
            let ledger = self.ledger.lock().await;
            if let Some((missing, _)) = rows.iter().find(|(s, _)| ledger.socio(s).is_none()) {
                return Err(EngineError::NotFound(*missing));
            }
        }

        let orden = rotation_from_rows(rows)?;

        let mut guard = self.ronda_write(&ronda_id).await?;
        check_active(&guard)?;
        if guard.has_movements() {
            return Err(EngineError::RosterLocked(ronda_id));
        }

        let event = Event::ParticipantsAssigned { ronda_id, orden: orden.clone() };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!("ronda {ronda_id}: {n} participants assigned");
        Ok(orden)
    }

    /// Replace the rotation. List position is the new `orden`.
    pub async fn reorder(&self, ronda_id: Ulid, orden: Vec<Ulid>) -> Result<(), EngineError> {
        let mut guard = self.ronda_write(&ronda_id).await?;
        check_active(&guard)?;
        if guard.participantes.is_empty() {
            return Err(EngineError::InvalidRoster("ronda has no participants yet".into()));
        }

        let current: HashSet<&Ulid> = guard.participantes.iter().collect();
        let proposed: HashSet<&Ulid> = orden.iter().collect();
        if orden.len() != guard.participantes.len() || proposed.len() != orden.len() || proposed != current {
            return Err(EngineError::InvalidRoster(
                "new order must list every participant exactly once".into(),
            ));
        }
        let pasados = guard.semana_actual.saturating_sub(1) as usize;
        if orden[..pasados] != guard.participantes[..pasados] {
            return Err(EngineError::InvalidRoster(format!(
                "the first {pasados} turns were already paid out"
            )));
        }

        let event = Event::RotationReordered { ronda_id, orden };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn set_responsable(
        &self,
        ronda_id: Ulid,
        socio_id: Ulid,
        semana: Option<u32>,
    ) -> Result<u32, EngineError> {
        let mut guard = self.ronda_write(&ronda_id).await?;
        check_active(&guard)?;
        check_participant(&guard, &socio_id)?;
        let semana = semana.unwrap_or(guard.semana_actual);
        let max = guard.duracion();
        if semana == 0 || semana > max {
            return Err(EngineError::InvalidWeek { semana, max });
        }

        let event = Event::ResponsableSet { ronda_id, semana, socio_id };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(semana)
    }

    pub async fn record_aporte(
        &self,
        ronda_id: Ulid,
        socio_id: Ulid,
        semana: u32,
        monto: Option<Cents>,
        multa: Cents,
        observaciones: Option<String>,
    ) -> Result<(), EngineError> {
        check_non_negative(multa, "multa must not be negative")?;
        check_observaciones(&observaciones)?;

        let mut guard = self.ronda_write(&ronda_id).await?;
        check_active(&guard)?;
        check_participant(&guard, &socio_id)?;
        check_open_week(&guard, semana)?;

        let monto = monto.unwrap_or(guard.monto_aporte);
        if monto != guard.monto_aporte {
            return Err(EngineError::InvalidAmount("aporte must equal the ronda's monto_aporte"));
        }
        if let Some(prestamo_id) = guard.aporte(semana, &socio_id).and_then(|a| a.prestamo_id) {
            return Err(EngineError::LoanBacked(prestamo_id));
        }

        let event = Event::AporteRecorded {
            ronda_id,
            socio_id,
            semana,
            monto,
            multa,
            observaciones,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn record_ahorro(
        &self,
        id: Ulid,
        ronda_id: Ulid,
        socio_id: Ulid,
        semana: u32,
        monto: Cents,
    ) -> Result<(), EngineError> {
        check_positive(monto, "ahorro must be positive")?;

        let mut guard = self.ronda_write(&ronda_id).await?;
        check_active(&guard)?;
        check_participant(&guard, &socio_id)?;
        check_open_week(&guard, semana)?;

        if guard.ahorros.iter().any(|a| a.id == id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if guard.ahorro_en_semana(&socio_id, semana) {
            return Err(EngineError::AhorroRepeated { socio_id, semana });
        }
        let restante = guard.ahorro_restante(&socio_id);
        if monto > restante {
            return Err(EngineError::AhorroCap { restante });
        }

        let event = Event::AhorroRecorded {
            id,
            ronda_id,
            socio_id,
            semana,
            monto,
            fecha: now_ms(),
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Savings deposit outside of any ronda.
    pub async fn deposit(
        &self,
        id: Ulid,
        socio_id: Ulid,
        monto: Cents,
        fecha: Option<Ms>,
    ) -> Result<(), EngineError> {
        check_positive(monto, "deposit must be positive")?;
        if let Some(fecha) = fecha {
            check_fecha(fecha, "fecha")?;
        }
        let mut ledger = self.ledger.lock().await;
        if ledger.socio(&socio_id).is_none() {
            return Err(EngineError::NotFound(socio_id));
        }
        if ledger.has_movimiento(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::MovimientoLibreRecorded(MovimientoLibre {
            id,
            socio_id,
            monto,
            fecha: fecha.unwrap_or_else(now_ms),
        });
        self.persist_and_apply_ledger(&mut ledger, &event).await
    }

    /// Savings withdrawal. Only allowed while no ronda is running and never
    /// beyond the member's overall balance.
    pub async fn withdraw(
        &self,
        id: Ulid,
        socio_id: Ulid,
        monto: Cents,
        fecha: Option<Ms>,
    ) -> Result<(), EngineError> {
        check_positive(monto, "withdrawal must be positive")?;
        if let Some(fecha) = fecha {
            check_fecha(fecha, "fecha")?;
        }
        let mut ledger = self.ledger.lock().await;
        if ledger.socio(&socio_id).is_none() {
            return Err(EngineError::NotFound(socio_id));
        }
        if ledger.has_movimiento(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if let Some(activa) = ledger.activa {
            return Err(EngineError::RondaActiva(activa));
        }

        let saldo = self.saldo_with(&ledger, &socio_id).await;
        if monto > saldo {
            tracing::debug!("withdrawal of {monto} by {socio_id} rejected, saldo {saldo}");
            return Err(EngineError::InsufficientBalance { saldo });
        }

        let event = Event::MovimientoLibreRecorded(MovimientoLibre {
            id,
            socio_id,
            monto: -monto,
            fecha: fecha.unwrap_or_else(now_ms),
        });
        self.persist_and_apply_ledger(&mut ledger, &event).await
    }
}

/// Turn `(socio, orden)` rows into a rotation vector.
fn rotation_from_rows(rows: Vec<(Ulid, Option<u32>)>) -> Result<Vec<Ulid>, EngineError> {
    let n = rows.len();
    let given = rows.iter().filter(|(_, o)| o.is_some()).count();
    if given == 0 {
        let mut orden: Vec<Ulid> = rows.into_iter().map(|(s, _)| s).collect();
        orden.shuffle(&mut rand::thread_rng());
        return Ok(orden);
    }
    if given != n {
        return Err(EngineError::InvalidRoster(
            "orden must be given for every participant or for none".into(),
        ));
    }

    let mut slots: Vec<Option<Ulid>> = vec![None; n];
    for (socio_id, orden) in rows {
        let pos = orden.unwrap_or(0) as usize;
        if pos == 0 || pos > n {
            return Err(EngineError::InvalidRoster(format!("orden {pos} out of range 1..={n}")));
        }
        if slots[pos - 1].replace(socio_id).is_some() {
            return Err(EngineError::InvalidRoster(format!("orden {pos} assigned twice")));
        }
    }
    Ok(slots.into_iter().flatten().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_orden_is_respected() {
        let (a, b, c) = (Ulid::new(), Ulid::new(), Ulid::new());
        let orden = rotation_from_rows(vec![(a, Some(3)), (b, Some(1)), (c, Some(2))]).unwrap();
        assert_eq!(orden, vec![b, c, a]);
    }

    #[test]
    fn draw_is_a_permutation() {
        let ids: Vec<Ulid> = (0..10).map(|_| Ulid::new()).collect();
        let orden = rotation_from_rows(ids.iter().map(|s| (*s, None)).collect()).unwrap();
        assert_eq!(orden.len(), 10);
        let drawn: HashSet<_> = orden.iter().collect();
        assert!(ids.iter().all(|s| drawn.contains(s)));
    }

    #[test]
    fn mixed_orden_rejected() {
        let r = rotation_from_rows(vec![(Ulid::new(), Some(1)), (Ulid::new(), None)]);
        assert!(matches!(r, Err(EngineError::InvalidRoster(_))));
    }

    #[test]
    fn orden_must_be_a_permutation() {
        let dup = rotation_from_rows(vec![(Ulid::new(), Some(1)), (Ulid::new(), Some(1))]);
        assert!(matches!(dup, Err(EngineError::InvalidRoster(_))));
        let gap = rotation_from_rows(vec![(Ulid::new(), Some(1)), (Ulid::new(), Some(3))]);
        assert!(matches!(gap, Err(EngineError::InvalidRoster(_))));
        let zero = rotation_from_rows(vec![(Ulid::new(), Some(0)), (Ulid::new(), Some(1))]);
        assert!(matches!(zero, Err(EngineError::InvalidRoster(_))));
    }
}
