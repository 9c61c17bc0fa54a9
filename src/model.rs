use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::limits::DAY_MS;

/// Unix milliseconds — the only time type.
pub type Ms = i64;

/// Money in integer cents.
pub type Cents = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Socio {
    pub id: Ulid,
    pub numero_cuenta: String,
    pub cedula: String,
    pub nombres: String,
    pub apellidos: String,
    pub edad: Option<u32>,
}

/// A savings movement outside of any ronda: deposits are positive,
/// withdrawals negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovimientoLibre {
    pub id: Ulid,
    pub socio_id: Ulid,
    pub monto: Cents,
    pub fecha: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aporte {
    pub socio_id: Ulid,
    pub semana: u32,
    pub monto: Cents,
    pub multa: Cents,
    /// Set when an express loan paid this week on the member's behalf.
    pub prestamo_id: Option<Ulid>,
    pub observaciones: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ahorro {
    pub id: Ulid,
    pub socio_id: Ulid,
    pub semana: u32,
    pub monto: Cents,
    pub fecha: Ms,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EstadoPrestamo {
    Pendiente,
    Pagado,
    Cancelado,
}

impl EstadoPrestamo {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstadoPrestamo::Pendiente => "PENDIENTE",
            EstadoPrestamo::Pagado => "PAGADO",
            EstadoPrestamo::Cancelado => "CANCELADO",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PENDIENTE" => Some(EstadoPrestamo::Pendiente),
            "PAGADO" => Some(EstadoPrestamo::Pagado),
            "CANCELADO" => Some(EstadoPrestamo::Cancelado),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrestamoExpress {
    pub id: Ulid,
    pub ronda_id: Ulid,
    pub socio_id: Ulid,
    pub semana: u32,
    pub principal: Cents,
    pub interes: Cents,
    pub estado: EstadoPrestamo,
    pub observaciones: Option<String>,
    pub creado: Ms,
}

impl PrestamoExpress {
    pub fn total(&self) -> Cents {
        self.principal + self.interes
    }
}

#[derive(Debug, Clone)]
pub struct RondaState {
    pub id: Ulid,
    pub codigo: u32,
    pub nombre: String,
    pub monto_aporte: Cents,
    pub ahorro_objetivo: Cents,
    pub multa: Cents,
    pub fecha_inicio: Ms,
    pub intervalo_dias: u32,
    pub fecha_fin: Option<Ms>,
    pub activa: bool,
    pub semana_actual: u32,
    /// Payout rotation: position `i` holds the member with `orden == i + 1`.
    pub participantes: Vec<Ulid>,
    /// Keyed by `(semana, socio_id)`.
    pub aportes: BTreeMap<(u32, Ulid), Aporte>,
    pub ahorros: Vec<Ahorro>,
    /// Collector per week.
    pub responsables: BTreeMap<u32, Ulid>,
    pub prestamos: BTreeMap<Ulid, PrestamoExpress>,
}

impl RondaState {
    pub fn new(def: RondaDef) -> Self {
        Self {
            id: def.id,
            codigo: def.codigo,
            nombre: def.nombre,
            monto_aporte: def.monto_aporte,
            ahorro_objetivo: def.ahorro_objetivo,
            multa: def.multa,
            fecha_inicio: def.fecha_inicio,
            intervalo_dias: def.intervalo_dias,
            fecha_fin: None,
            activa: true,
            semana_actual: 1,
            participantes: Vec::new(),
            aportes: BTreeMap::new(),
            ahorros: Vec::new(),
            responsables: BTreeMap::new(),
            prestamos: BTreeMap::new(),
        }
    }

    /// Number of weeks of the cycle: one payout per participant.
    pub fn duracion(&self) -> u32 {
        self.participantes.len() as u32
    }

    pub fn orden_of(&self, socio_id: &Ulid) -> Option<u32> {
        self.participantes
            .iter()
            .position(|s| s == socio_id)
            .map(|i| i as u32 + 1)
    }

    pub fn is_participant(&self, socio_id: &Ulid) -> bool {
        self.participantes.contains(socio_id)
    }

    /// Member whose turn it is to receive the pooled payout in `semana`.
    pub fn beneficiario(&self, semana: u32) -> Option<Ulid> {
        if semana == 0 {
            return None;
        }
        self.participantes.get(semana as usize - 1).copied()
    }

    /// Pooled payout of one week.
    pub fn pozo(&self) -> Cents {
        self.monto_aporte * self.participantes.len() as Cents
    }

    pub fn aporte(&self, semana: u32, socio_id: &Ulid) -> Option<&Aporte> {
        self.aportes.get(&(semana, *socio_id))
    }

    /// Participants without an aporte for `semana`, in rotation order.
    pub fn pendientes(&self, semana: u32) -> Vec<Ulid> {
        self.participantes
            .iter()
            .filter(|s| !self.aportes.contains_key(&(semana, **s)))
            .copied()
            .collect()
    }

    /// Savings of a member in this ronda, up to and including `hasta` when given.
    pub fn ahorro_acumulado(&self, socio_id: &Ulid, hasta: Option<u32>) -> Cents {
        self.ahorros
            .iter()
            .filter(|a| a.socio_id == *socio_id && hasta.is_none_or(|h| a.semana <= h))
            .map(|a| a.monto)
            .sum()
    }

    /// Savings the member may still add in this ronda.
    pub fn ahorro_restante(&self, socio_id: &Ulid) -> Cents {
        (self.ahorro_objetivo - self.ahorro_acumulado(socio_id, None)).max(0)
    }

    pub fn ahorro_en_semana(&self, socio_id: &Ulid, semana: u32) -> bool {
        self.ahorros
            .iter()
            .any(|a| a.socio_id == *socio_id && a.semana == semana)
    }

    /// Planned end: one interval per payout after the first.
    pub fn fecha_fin_planificada(&self) -> Ms {
        let pasos = self.participantes.len().saturating_sub(1) as Ms;
        pasos
            .saturating_mul(self.intervalo_dias as Ms)
            .saturating_mul(DAY_MS)
            .saturating_add(self.fecha_inicio)
    }

    /// True once anything besides the roster has been recorded.
    pub fn has_movements(&self) -> bool {
        !self.aportes.is_empty() || !self.ahorros.is_empty() || !self.prestamos.is_empty()
    }

    /// `(aportes, multas)` of one member across all weeks.
    pub fn totales_socio(&self, socio_id: &Ulid) -> (Cents, Cents) {
        self.aportes
            .values()
            .filter(|a| a.socio_id == *socio_id)
            .fold((0, 0), |(m, x), a| (m + a.monto, x + a.multa))
    }

    /// `(aportes, multas, ahorros)` of one week.
    pub fn totales_semana(&self, semana: u32) -> (Cents, Cents, Cents) {
        let (aportes, multas) = self
            .aportes
            .range((semana, Ulid::nil())..=(semana, Ulid::from(u128::MAX)))
            .fold((0, 0), |(m, x), (_, a)| (m + a.monto, x + a.multa));
        let ahorros = self
            .ahorros
            .iter()
            .filter(|a| a.semana == semana)
            .map(|a| a.monto)
            .sum();
        (aportes, multas, ahorros)
    }
}

/// Display code of a ronda: `RD0007`.
pub fn format_codigo(codigo: u32) -> String {
    format!("{}{codigo:04}", crate::limits::CODIGO_PREFIX)
}

/// Everything needed to open a ronda.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RondaDef {
    pub id: Ulid,
    pub codigo: u32,
    pub nombre: String,
    pub monto_aporte: Cents,
    pub ahorro_objetivo: Cents,
    pub multa: Cents,
    pub fecha_inicio: Ms,
    pub intervalo_dias: u32,
}

/// The event types — flat, no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SocioRegistered(Socio),
    RondaCreated(RondaDef),
    /// The full rotation; position `i` gets `orden == i + 1`.
    ParticipantsAssigned {
        ronda_id: Ulid,
        orden: Vec<Ulid>,
    },
    RotationReordered {
        ronda_id: Ulid,
        orden: Vec<Ulid>,
    },
    ResponsableSet {
        ronda_id: Ulid,
        semana: u32,
        socio_id: Ulid,
    },
    AporteRecorded {
        ronda_id: Ulid,
        socio_id: Ulid,
        semana: u32,
        monto: Cents,
        multa: Cents,
        observaciones: Option<String>,
    },
    AhorroRecorded {
        id: Ulid,
        ronda_id: Ulid,
        socio_id: Ulid,
        semana: u32,
        monto: Cents,
        fecha: Ms,
    },
    /// Records the loan and the aporte it covers in one step.
    PrestamoGranted {
        id: Ulid,
        ronda_id: Ulid,
        socio_id: Ulid,
        semana: u32,
        principal: Cents,
        interes: Cents,
        aporte: Cents,
        observaciones: Option<String>,
        creado: Ms,
    },
    PrestamoSettled {
        id: Ulid,
        ronda_id: Ulid,
    },
    PrestamoCancelled {
        id: Ulid,
        ronda_id: Ulid,
        revertir_aporte: bool,
    },
    SemanaCerrada {
        ronda_id: Ulid,
        semana: u32,
        finalizada: bool,
        at: Ms,
    },
    MovimientoLibreRecorded(MovimientoLibre),
}

impl Event {
    /// The ronda an event mutates, for ronda-scoped events.
    pub fn ronda_id(&self) -> Option<Ulid> {
        match self {
            Event::RondaCreated(def) => Some(def.id),
            Event::ParticipantsAssigned { ronda_id, .. }
            | Event::RotationReordered { ronda_id, .. }
            | Event::ResponsableSet { ronda_id, .. }
            | Event::AporteRecorded { ronda_id, .. }
            | Event::AhorroRecorded { ronda_id, .. }
            | Event::PrestamoGranted { ronda_id, .. }
            | Event::PrestamoSettled { ronda_id, .. }
            | Event::PrestamoCancelled { ronda_id, .. }
            | Event::SemanaCerrada { ronda_id, .. } => Some(*ronda_id),
            Event::SocioRegistered(_) | Event::MovimientoLibreRecorded(_) => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocioInfo {
    pub socio: Socio,
    pub ahorros: Cents,
    pub multas: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RondaInfo {
    pub id: Ulid,
    pub codigo: String,
    pub nombre: String,
    pub monto_aporte: Cents,
    pub ahorro_objetivo: Cents,
    pub multa: Cents,
    pub fecha_inicio: Ms,
    pub fecha_fin: Option<Ms>,
    pub activa: bool,
    pub semana_actual: u32,
    pub participantes: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipanteInfo {
    pub ronda_id: Ulid,
    pub socio_id: Ulid,
    pub orden: u32,
    pub nombres: String,
    pub apellidos: String,
    pub numero_cuenta: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnoInfo {
    pub ronda_id: Ulid,
    pub semana: u32,
    pub beneficiario_id: Ulid,
    pub orden: u32,
    pub pozo: Cents,
    pub responsable_id: Option<Ulid>,
}

/// One participant's standing in one week.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EstadoSemana {
    pub socio_id: Ulid,
    pub orden: u32,
    pub pagado: bool,
    pub monto: Option<Cents>,
    pub multa: Cents,
    pub prestamo_id: Option<Ulid>,
    pub ahorro_acumulado: Cents,
    pub ahorro_restante: Cents,
    pub ahorro_semana: bool,
    pub beneficiario: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumenSemana {
    pub semana: u32,
    pub total_aportes: Cents,
    pub total_multas: Cents,
    pub total_ahorros: Cents,
    pub beneficiario_id: Option<Ulid>,
    pub responsable_id: Option<Ulid>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultadoSocio {
    pub socio_id: Ulid,
    pub orden: u32,
    pub aportes: Cents,
    pub multas: Cents,
    pub ahorros: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResumenRonda {
    pub ronda: RondaInfo,
    pub duracion_semanas: u32,
    pub total_recaudado: Cents,
    pub total_multas: Cents,
    pub total_ahorros: Cents,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendienteInfo {
    pub socio_id: Ulid,
    pub monto_aporte: Cents,
    pub multa: Cents,
}

impl PendienteInfo {
    pub fn total_adeudado(&self) -> Cents {
        self.monto_aporte + self.multa
    }
}

/// Outcome of trying to close the current week.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CierreSemana {
    /// Nothing changed: these members still owe the week.
    Pendiente {
        semana: u32,
        pendientes: Vec<PendienteInfo>,
    },
    /// The ronda moved on to `siguiente`.
    Avanzada { semana: u32, siguiente: u32 },
    /// The last week closed and the ronda ended.
    Finalizada { semana: u32 },
}

/// A savings movement as seen from the member's account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovimientoAhorro {
    pub id: Ulid,
    pub socio_id: Ulid,
    /// `None` for deposits and withdrawals outside of rondas.
    pub ronda_id: Option<Ulid>,
    pub semana: Option<u32>,
    pub monto: Cents,
    pub fecha: Ms,
}
