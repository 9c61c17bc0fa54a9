use std::collections::BTreeMap;

use ulid::Ulid;

use crate::model::*;

/// Tenant-wide books that span rondas: the member registry, free savings
/// movements, the ronda code sequence and which ronda is active.
#[derive(Debug)]
pub struct Ledger {
    /// Ordered by ULID, i.e. by registration time.
    pub socios: BTreeMap<Ulid, Socio>,
    pub movimientos: Vec<MovimientoLibre>,
    pub next_codigo: u32,
    pub activa: Option<Ulid>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            socios: BTreeMap::new(),
            movimientos: Vec::new(),
            next_codigo: 1,
            activa: None,
        }
    }
}

impl Ledger {
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::SocioRegistered(socio) => {
                self.socios.insert(socio.id, socio.clone());
            }
            Event::RondaCreated(def) => {
                self.next_codigo = self.next_codigo.max(def.codigo + 1);
                self.activa = Some(def.id);
            }
            Event::SemanaCerrada {
                ronda_id,
                finalizada: true,
                ..
            } => {
                if self.activa == Some(*ronda_id) {
                    self.activa = None;
                }
            }
            Event::MovimientoLibreRecorded(mov) => {
                self.movimientos.push(mov.clone());
            }
            _ => {}
        }
    }

    pub fn socio(&self, id: &Ulid) -> Option<&Socio> {
        self.socios.get(id)
    }

    /// Field name of the first unique key `socio` would collide on.
    pub fn duplicate_key(&self, socio: &Socio) -> Option<(&'static str, String)> {
        self.socios.values().find_map(|s| {
            if s.numero_cuenta == socio.numero_cuenta {
                Some(("numero_cuenta", socio.numero_cuenta.clone()))
            } else if s.cedula == socio.cedula {
                Some(("cedula", socio.cedula.clone()))
            } else {
                None
            }
        })
    }

    /// Sum of free deposits and withdrawals of a member.
    pub fn saldo_libre(&self, socio_id: &Ulid) -> Cents {
        self.movimientos
            .iter()
            .filter(|m| m.socio_id == *socio_id)
            .map(|m| m.monto)
            .sum()
    }

    pub fn has_movimiento(&self, id: &Ulid) -> bool {
        self.movimientos.iter().any(|m| m.id == *id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socio(cuenta: &str, cedula: &str) -> Socio {
        Socio {
            id: Ulid::new(),
            numero_cuenta: cuenta.into(),
            cedula: cedula.into(),
            nombres: "Luis".into(),
            apellidos: "Mora".into(),
            edad: None,
        }
    }

    fn def(codigo: u32) -> RondaDef {
        RondaDef {
            id: Ulid::new(),
            codigo,
            nombre: "R".into(),
            monto_aporte: 1_000,
            ahorro_objetivo: 0,
            multa: 0,
            fecha_inicio: 0,
            intervalo_dias: 7,
        }
    }

    #[test]
    fn codigo_sequence_follows_highest_seen() {
        let mut ledger = Ledger::default();
        assert_eq!(ledger.next_codigo, 1);
        ledger.apply(&Event::RondaCreated(def(1)));
        assert_eq!(ledger.next_codigo, 2);
        ledger.apply(&Event::RondaCreated(def(7)));
        assert_eq!(ledger.next_codigo, 8);
        ledger.apply(&Event::RondaCreated(def(3)));
        assert_eq!(ledger.next_codigo, 8);
    }

    #[test]
    fn final_week_clears_active_ronda() {
        let mut ledger = Ledger::default();
        let d = def(1);
        let id = d.id;
        ledger.apply(&Event::RondaCreated(d));
        assert_eq!(ledger.activa, Some(id));

        ledger.apply(&Event::SemanaCerrada { ronda_id: id, semana: 1, finalizada: false, at: 0 });
        assert_eq!(ledger.activa, Some(id));

        ledger.apply(&Event::SemanaCerrada { ronda_id: id, semana: 2, finalizada: true, at: 0 });
        assert_eq!(ledger.activa, None);
    }

    #[test]
    fn duplicate_key_detects_cuenta_then_cedula() {
        let mut ledger = Ledger::default();
        ledger.apply(&Event::SocioRegistered(socio("A-1", "111")));

        let dup_cuenta = socio("A-1", "222");
        assert_eq!(ledger.duplicate_key(&dup_cuenta), Some(("numero_cuenta", "A-1".to_string())));

        let dup_cedula = socio("A-2", "111");
        assert_eq!(ledger.duplicate_key(&dup_cedula), Some(("cedula", "111".to_string())));

        assert_eq!(ledger.duplicate_key(&socio("A-3", "333")), None);
    }

    #[test]
    fn saldo_libre_nets_deposits_and_withdrawals() {
        let mut ledger = Ledger::default();
        let s = Ulid::new();
        for monto in [5_000, -1_500, 200] {
            ledger.apply(&Event::MovimientoLibreRecorded(MovimientoLibre {
                id: Ulid::new(),
                socio_id: s,
                monto,
                fecha: 0,
            }));
        }
        assert_eq!(ledger.saldo_libre(&s), 3_700);
        assert_eq!(ledger.saldo_libre(&Ulid::new()), 0);
    }
}
