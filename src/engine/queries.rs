use ulid::Ulid;

use crate::model::*;

use super::{Engine, EngineError, Ledger};

pub(crate) fn ronda_info(rs: &RondaState) -> RondaInfo {
    RondaInfo {
        id: rs.id,
        codigo: format_codigo(rs.codigo),
        nombre: rs.nombre.clone(),
        monto_aporte: rs.monto_aporte,
        ahorro_objetivo: rs.ahorro_objetivo,
        multa: rs.multa,
        fecha_inicio: rs.fecha_inicio,
        fecha_fin: rs.fecha_fin,
        activa: rs.activa,
        semana_actual: rs.semana_actual,
        participantes: rs.duracion(),
    }
}

impl Engine {
    /// Every member with savings and penalty totals, across all rondas or
    /// within one.
    pub async fn socios(&self, ronda_id: Option<Ulid>) -> Result<Vec<SocioInfo>, EngineError> {
        let ledger = self.ledger.lock().await;
        let rondas = match ronda_id {
            Some(id) => vec![self.get_ronda(&id).ok_or(EngineError::NotFound(id))?],
            None => self.ronda_handles(),
        };

        let mut out: Vec<SocioInfo> = ledger
            .socios
            .values()
            .map(|socio| SocioInfo {
                socio: socio.clone(),
                ahorros: if ronda_id.is_none() { ledger.saldo_libre(&socio.id) } else { 0 },
                multas: 0,
            })
            .collect();
        for rs in rondas {
            let guard = rs.read().await;
            for info in &mut out {
                info.ahorros += guard.ahorro_acumulado(&info.socio.id, None);
                info.multas += guard.totales_socio(&info.socio.id).1;
            }
        }
        Ok(out)
    }

    /// Ronda history, newest start first.
    pub async fn rondas(&self, activa: Option<bool>) -> Vec<RondaInfo> {
        let mut out = Vec::new();
        for rs in self.ronda_handles() {
            let guard = rs.read().await;
            if activa.is_none_or(|a| a == guard.activa) {
                out.push(ronda_info(&guard));
            }
        }
        out.sort_by(|a, b| {
            b.fecha_inicio
                .cmp(&a.fecha_inicio)
                .then_with(|| b.codigo.cmp(&a.codigo))
        });
        out
    }

    /// Code the next ronda will get. Does not reserve it.
    pub async fn next_codigo(&self) -> String {
        format_codigo(self.ledger.lock().await.next_codigo)
    }

    pub async fn participantes(&self, ronda_id: Ulid) -> Result<Vec<ParticipanteInfo>, EngineError> {
        let ledger = self.ledger.lock().await;
        let guard = self.ronda_read(&ronda_id).await?;
        Ok(guard
            .participantes
            .iter()
            .enumerate()
            .filter_map(|(i, socio_id)| {
                let socio = ledger.socio(socio_id)?;
                Some(ParticipanteInfo {
                    ronda_id,
                    socio_id: *socio_id,
                    orden: i as u32 + 1,
                    nombres: socio.nombres.clone(),
                    apellidos: socio.apellidos.clone(),
                    numero_cuenta: socio.numero_cuenta.clone(),
                })
            })
            .collect())
    }

    /// Whose turn it is in `semana` (the running week by default).
    pub async fn turno(&self, ronda_id: Ulid, semana: Option<u32>) -> Result<TurnoInfo, EngineError> {
        let guard = self.ronda_read(&ronda_id).await?;
        let semana = semana.unwrap_or(guard.semana_actual);
        let beneficiario_id = guard.beneficiario(semana).ok_or(EngineError::InvalidWeek {
            semana,
            max: guard.duracion(),
        })?;
        Ok(TurnoInfo {
            ronda_id,
            semana,
            beneficiario_id,
            orden: semana,
            pozo: guard.pozo(),
            responsable_id: guard.responsables.get(&semana).copied(),
        })
    }

    /// Standing of every participant in one week, in rotation order.
    pub async fn semana(&self, ronda_id: Ulid, semana: u32) -> Result<Vec<EstadoSemana>, EngineError> {
        let guard = self.ronda_read(&ronda_id).await?;
        let max = guard.duracion();
        if semana == 0 || semana > max {
            return Err(EngineError::InvalidWeek { semana, max });
        }
        let beneficiario = guard.beneficiario(semana);

        Ok(guard
            .participantes
            .iter()
            .enumerate()
            .map(|(i, socio_id)| {
                let aporte = guard.aporte(semana, socio_id);
                let acumulado = guard.ahorro_acumulado(socio_id, Some(semana));
                EstadoSemana {
                    socio_id: *socio_id,
                    orden: i as u32 + 1,
                    pagado: aporte.is_some(),
                    monto: aporte.map(|a| a.monto),
                    multa: aporte.map_or(0, |a| a.multa),
                    prestamo_id: aporte.and_then(|a| a.prestamo_id),
                    ahorro_acumulado: acumulado,
                    ahorro_restante: (guard.ahorro_objetivo - acumulado).max(0),
                    ahorro_semana: guard.ahorro_en_semana(socio_id, semana),
                    beneficiario: beneficiario == Some(*socio_id),
                }
            })
            .collect())
    }

    /// Weekly totals for every week of the cycle.
    pub async fn semanas(&self, ronda_id: Ulid) -> Result<Vec<ResumenSemana>, EngineError> {
        let guard = self.ronda_read(&ronda_id).await?;
        Ok((1..=guard.duracion().max(1))
            .map(|semana| {
                let (total_aportes, total_multas, total_ahorros) = guard.totales_semana(semana);
                ResumenSemana {
                    semana,
                    total_aportes,
                    total_multas,
                    total_ahorros,
                    beneficiario_id: guard.beneficiario(semana),
                    responsable_id: guard.responsables.get(&semana).copied(),
                }
            })
            .collect())
    }

    pub async fn resultados(&self, ronda_id: Ulid) -> Result<Vec<ResultadoSocio>, EngineError> {
        let guard = self.ronda_read(&ronda_id).await?;
        Ok(guard
            .participantes
            .iter()
            .enumerate()
            .map(|(i, socio_id)| {
                let (aportes, multas) = guard.totales_socio(socio_id);
                ResultadoSocio {
                    socio_id: *socio_id,
                    orden: i as u32 + 1,
                    aportes,
                    multas,
                    ahorros: guard.ahorro_acumulado(socio_id, None),
                }
            })
            .collect())
    }

    pub async fn resumen(&self, ronda_id: Ulid) -> Result<ResumenRonda, EngineError> {
        let guard = self.ronda_read(&ronda_id).await?;
        let (total_recaudado, total_multas) = guard
            .aportes
            .values()
            .fold((0, 0), |(m, x), a| (m + a.monto, x + a.multa));
        Ok(ResumenRonda {
            ronda: ronda_info(&guard),
            duracion_semanas: guard.duracion(),
            total_recaudado,
            total_multas,
            total_ahorros: guard.ahorros.iter().map(|a| a.monto).sum(),
        })
    }

    /// Every savings movement of a member, newest first, optionally limited
    /// to `[desde, hasta]`.
    pub async fn ahorro_history(
        &self,
        socio_id: Ulid,
        desde: Option<Ms>,
        hasta: Option<Ms>,
    ) -> Result<Vec<MovimientoAhorro>, EngineError> {
        let ledger = self.ledger.lock().await;
        if ledger.socio(&socio_id).is_none() {
            return Err(EngineError::NotFound(socio_id));
        }
        let in_range = |fecha: Ms| desde.is_none_or(|d| fecha >= d) && hasta.is_none_or(|h| fecha <= h);

        let mut out: Vec<MovimientoAhorro> = ledger
            .movimientos
            .iter()
            .filter(|m| m.socio_id == socio_id && in_range(m.fecha))
            .map(|m| MovimientoAhorro {
                id: m.id,
                socio_id,
                ronda_id: None,
                semana: None,
                monto: m.monto,
                fecha: m.fecha,
            })
            .collect();
        for rs in self.ronda_handles() {
            let guard = rs.read().await;
            out.extend(
                guard
                    .ahorros
                    .iter()
                    .filter(|a| a.socio_id == socio_id && in_range(a.fecha))
                    .map(|a| MovimientoAhorro {
                        id: a.id,
                        socio_id,
                        ronda_id: Some(guard.id),
                        semana: Some(a.semana),
                        monto: a.monto,
                        fecha: a.fecha,
                    }),
            );
        }
        out.sort_by(|a, b| b.fecha.cmp(&a.fecha).then_with(|| b.id.cmp(&a.id)));
        Ok(out)
    }

    /// Overall savings balance: ronda ahorros plus free movements.
    pub async fn saldo(&self, socio_id: Ulid) -> Result<Cents, EngineError> {
        let ledger = self.ledger.lock().await;
        if ledger.socio(&socio_id).is_none() {
            return Err(EngineError::NotFound(socio_id));
        }
        Ok(self.saldo_with(&ledger, &socio_id).await)
    }

    /// Caller holds the ledger lock.
    pub(super) async fn saldo_with(&self, ledger: &Ledger, socio_id: &Ulid) -> Cents {
        let mut saldo = ledger.saldo_libre(socio_id);
        for rs in self.ronda_handles() {
            saldo += rs.read().await.ahorro_acumulado(socio_id, None);
        }
        saldo
    }

    /// Express loans in one state (pending by default), newest first.
    pub async fn prestamos(&self, estado: Option<EstadoPrestamo>) -> Vec<PrestamoExpress> {
        let estado = estado.unwrap_or(EstadoPrestamo::Pendiente);
        let mut out = Vec::new();
        for rs in self.ronda_handles() {
            let guard = rs.read().await;
            out.extend(guard.prestamos.values().filter(|p| p.estado == estado).cloned());
        }
        out.sort_by(|a, b| b.creado.cmp(&a.creado).then_with(|| b.id.cmp(&a.id)));
        out
    }
}
