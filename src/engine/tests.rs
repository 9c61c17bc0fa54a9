use super::*;
use crate::limits::*;

const INICIO: Ms = 1_700_000_000_000;
const APORTE: Cents = 2_000; // 20.00

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("caja_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

async fn add_socio(engine: &Engine, n: u32) -> Ulid {
    let id = Ulid::new();
    engine
        .create_socio(Socio {
            id,
            numero_cuenta: format!("C-{n:04}"),
            cedula: format!("{n:010}"),
            nombres: format!("Nombre{n}"),
            apellidos: format!("Apellido{n}"),
            edad: Some(30 + n),
        })
        .await
        .unwrap();
    id
}

/// Engine with one active ronda whose rotation is `socios` in order.
async fn setup(name: &str, n: u32, ahorro_objetivo: Cents) -> (Engine, PathBuf, Ulid, Vec<Ulid>) {
    let path = test_wal_path(name);
    let engine = Engine::new(path.clone()).unwrap();
    let mut socios = Vec::new();
    for i in 1..=n {
        socios.push(add_socio(&engine, i).await);
    }
    let ronda = Ulid::new();
    engine
        .create_ronda(ronda, "Ronda".into(), APORTE, INICIO, Some(ahorro_objetivo), None, None)
        .await
        .unwrap();
    let rows = socios
        .iter()
        .enumerate()
        .map(|(i, s)| (*s, Some(i as u32 + 1)))
        .collect();
    engine.assign_participants(ronda, rows).await.unwrap();
    (engine, path, ronda, socios)
}

async fn pay_week(engine: &Engine, ronda: Ulid, socios: &[Ulid], semana: u32) {
    for s in socios {
        engine.record_aporte(ronda, *s, semana, None, 0, None).await.unwrap();
    }
}

// ── Socios and rondas ─────────────────────────────────────

#[tokio::test]
async fn create_socio_rejects_duplicate_keys() {
    let engine = Engine::new(test_wal_path("socio_dup.wal")).unwrap();
    let first = add_socio(&engine, 1).await;

    let again = engine
        .create_socio(Socio {
            id: first,
            numero_cuenta: "X".into(),
            cedula: "Y".into(),
            nombres: "A".into(),
            apellidos: "B".into(),
            edad: None,
        })
        .await;
    assert!(matches!(again, Err(EngineError::AlreadyExists(id)) if id == first));

    let same_cuenta = engine
        .create_socio(Socio {
            id: Ulid::new(),
            numero_cuenta: "C-0001".into(),
            cedula: "999".into(),
            nombres: "A".into(),
            apellidos: "B".into(),
            edad: None,
        })
        .await;
    assert!(matches!(same_cuenta, Err(EngineError::Duplicate("numero_cuenta", _))));

    let same_cedula = engine
        .create_socio(Socio {
            id: Ulid::new(),
            numero_cuenta: "C-0999".into(),
            cedula: format!("{:010}", 1),
            nombres: "A".into(),
            apellidos: "B".into(),
            edad: None,
        })
        .await;
    assert!(matches!(same_cedula, Err(EngineError::Duplicate("cedula", _))));

    let blank = engine
        .create_socio(Socio {
            id: Ulid::new(),
            numero_cuenta: "C-2".into(),
            cedula: "2".into(),
            nombres: " ".into(),
            apellidos: "B".into(),
            edad: None,
        })
        .await;
    assert!(matches!(blank, Err(EngineError::InvalidField(_))));
}

#[tokio::test]
async fn boundary_inputs_are_rejected_before_the_wal() {
    let path = test_wal_path("boundary_inputs.wal");
    let engine = Engine::new(path.clone()).unwrap();
    let s = add_socio(&engine, 1).await;
    let t = add_socio(&engine, 2).await;

    for edad in [MAX_EDAD + 1, u32::MAX] {
        let r = engine
            .create_socio(Socio {
                id: Ulid::new(),
                numero_cuenta: format!("E-{edad}"),
                cedula: format!("E{edad}"),
                nombres: "A".into(),
                apellidos: "B".into(),
                edad: Some(edad),
            })
            .await;
        assert!(matches!(r, Err(EngineError::InvalidField(_))));
    }

    for fecha_inicio in [Ms::MAX - 1, MAX_FECHA_MS + 1, -1, Ms::MIN] {
        let r = engine
            .create_ronda(Ulid::new(), "Lejana".into(), APORTE, fecha_inicio, None, Some(MAX_INTERVALO_DIAS), None)
            .await;
        assert!(matches!(r, Err(EngineError::InvalidField(_))), "fecha_inicio {fecha_inicio}");
    }
    for fecha in [Ms::MAX, -1] {
        assert!(matches!(
            engine.deposit(Ulid::new(), s, 100, Some(fecha)).await,
            Err(EngineError::InvalidField(_))
        ));
        assert!(matches!(
            engine.withdraw(Ulid::new(), s, 100, Some(fecha)).await,
            Err(EngineError::InvalidField(_))
        ));
    }
    assert!(matches!(
        engine.deposit(Ulid::new(), s, MAX_AMOUNT_CENTS + 1, None).await,
        Err(EngineError::LimitExceeded(_))
    ));

    // The latest accepted date still plans a finite end.
    let ronda = Ulid::new();
    engine
        .create_ronda(ronda, "Tope".into(), APORTE, MAX_FECHA_MS, None, Some(MAX_INTERVALO_DIAS), None)
        .await
        .unwrap();
    engine.assign_participants(ronda, vec![(s, Some(1)), (t, Some(2))]).await.unwrap();
    let info = engine.rondas(Some(true)).await;
    assert_eq!(info[0].fecha_fin, Some(MAX_FECHA_MS + MAX_INTERVALO_DIAS as Ms * DAY_MS));

    // Replay accepts everything that was persisted.
    drop(engine);
    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.socios(None).await.unwrap().len(), 2);
    assert_eq!(engine.rondas(None).await.len(), 1);
}

#[tokio::test]
async fn create_ronda_assigns_codes_and_defaults() {
    let engine = Engine::new(test_wal_path("ronda_codes.wal")).unwrap();
    assert_eq!(engine.next_codigo().await, "RD0001");
    // Preview does not consume the sequence.
    assert_eq!(engine.next_codigo().await, "RD0001");

    let id = Ulid::new();
    let codigo = engine
        .create_ronda(id, "Enero".into(), APORTE, INICIO, None, None, None)
        .await
        .unwrap();
    assert_eq!(codigo, "RD0001");
    assert_eq!(engine.next_codigo().await, "RD0002");

    let rondas = engine.rondas(None).await;
    assert_eq!(rondas.len(), 1);
    let r = &rondas[0];
    assert_eq!(r.codigo, "RD0001");
    assert_eq!(r.multa, DEFAULT_MULTA_CENTS);
    assert_eq!(r.ahorro_objetivo, 0);
    assert_eq!(r.semana_actual, 1);
    assert!(r.activa);
    assert_eq!(r.fecha_fin, None);
}

#[tokio::test]
async fn only_one_active_ronda() {
    let engine = Engine::new(test_wal_path("one_active.wal")).unwrap();
    let first = Ulid::new();
    engine
        .create_ronda(first, "A".into(), APORTE, INICIO, None, None, None)
        .await
        .unwrap();
    let second = engine
        .create_ronda(Ulid::new(), "B".into(), APORTE, INICIO, None, None, None)
        .await;
    assert!(matches!(second, Err(EngineError::RondaActiva(id)) if id == first));
}

#[tokio::test]
async fn create_ronda_validates_input() {
    let engine = Engine::new(test_wal_path("ronda_validate.wal")).unwrap();
    let zero = engine
        .create_ronda(Ulid::new(), "A".into(), 0, INICIO, None, None, None)
        .await;
    assert!(matches!(zero, Err(EngineError::InvalidAmount(_))));

    let neg_ahorro = engine
        .create_ronda(Ulid::new(), "A".into(), APORTE, INICIO, Some(-1), None, None)
        .await;
    assert!(matches!(neg_ahorro, Err(EngineError::InvalidAmount(_))));

    let neg_multa = engine
        .create_ronda(Ulid::new(), "A".into(), APORTE, INICIO, None, None, Some(-5))
        .await;
    assert!(matches!(neg_multa, Err(EngineError::InvalidAmount(_))));

    let no_interval = engine
        .create_ronda(Ulid::new(), "A".into(), APORTE, INICIO, None, Some(0), None)
        .await;
    assert!(matches!(no_interval, Err(EngineError::LimitExceeded(_))));

    let unnamed = engine
        .create_ronda(Ulid::new(), "".into(), APORTE, INICIO, None, None, None)
        .await;
    assert!(unnamed.is_err());

    // Nothing was created and the sequence did not move.
    assert!(engine.rondas(None).await.is_empty());
    assert_eq!(engine.next_codigo().await, "RD0001");
}

// ── Rotation ──────────────────────────────────────────────

#[tokio::test]
async fn explicit_rotation_and_fecha_fin() {
    let (engine, _, ronda, socios) = setup("rotation_explicit.wal", 4, 0).await;

    let participantes = engine.participantes(ronda).await.unwrap();
    assert_eq!(participantes.len(), 4);
    for (i, p) in participantes.iter().enumerate() {
        assert_eq!(p.socio_id, socios[i]);
        assert_eq!(p.orden, i as u32 + 1);
    }
    assert_eq!(participantes[0].numero_cuenta, "C-0001");

    let info = engine.resumen(ronda).await.unwrap();
    assert_eq!(info.duracion_semanas, 4);
    assert_eq!(info.ronda.fecha_fin, Some(INICIO + 3 * 7 * DAY_MS));
}

#[tokio::test]
async fn random_draw_covers_every_member() {
    let engine = Engine::new(test_wal_path("rotation_draw.wal")).unwrap();
    let mut socios = Vec::new();
    for i in 1..=8 {
        socios.push(add_socio(&engine, i).await);
    }
    let ronda = Ulid::new();
    engine
        .create_ronda(ronda, "Sorteo".into(), APORTE, INICIO, None, None, None)
        .await
        .unwrap();
    let orden = engine
        .assign_participants(ronda, socios.iter().map(|s| (*s, None)).collect())
        .await
        .unwrap();
    assert_eq!(orden.len(), 8);
    let mut sorted = orden.clone();
    sorted.sort();
    let mut expected = socios.clone();
    expected.sort();
    assert_eq!(sorted, expected);

    let participantes = engine.participantes(ronda).await.unwrap();
    let stored: Vec<Ulid> = participantes.iter().map(|p| p.socio_id).collect();
    assert_eq!(stored, orden);
}

#[tokio::test]
async fn assign_participants_validates_roster() {
    let engine = Engine::new(test_wal_path("roster_validate.wal")).unwrap();
    let a = add_socio(&engine, 1).await;
    let b = add_socio(&engine, 2).await;
    let ronda = Ulid::new();
    engine
        .create_ronda(ronda, "R".into(), APORTE, INICIO, None, None, None)
        .await
        .unwrap();

    let alone = engine.assign_participants(ronda, vec![(a, None)]).await;
    assert!(matches!(alone, Err(EngineError::InvalidRoster(_))));

    let twice = engine.assign_participants(ronda, vec![(a, None), (a, None)]).await;
    assert!(matches!(twice, Err(EngineError::InvalidRoster(_))));

    let stranger = Ulid::new();
    let unknown = engine.assign_participants(ronda, vec![(a, None), (stranger, None)]).await;
    assert!(matches!(unknown, Err(EngineError::NotFound(id)) if id == stranger));

    let bad_orden = engine
        .assign_participants(ronda, vec![(a, Some(1)), (b, Some(5))])
        .await;
    assert!(matches!(bad_orden, Err(EngineError::InvalidRoster(_))));

    let missing_ronda = engine.assign_participants(Ulid::new(), vec![(a, None), (b, None)]).await;
    assert!(matches!(missing_ronda, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn roster_locked_once_money_moves() {
    let (engine, _, ronda, socios) = setup("roster_locked.wal", 3, 0).await;

    // Still replaceable: nothing recorded yet.
    let reversed: Vec<(Ulid, Option<u32>)> = socios
        .iter()
        .rev()
        .enumerate()
        .map(|(i, s)| (*s, Some(i as u32 + 1)))
        .collect();
    engine.assign_participants(ronda, reversed).await.unwrap();

    engine
        .record_aporte(ronda, socios[0], 1, None, 0, None)
        .await
        .unwrap();
    let again = engine
        .assign_participants(ronda, socios.iter().map(|s| (*s, None)).collect())
        .await;
    assert!(matches!(again, Err(EngineError::RosterLocked(id)) if id == ronda));
}

#[tokio::test]
async fn turno_follows_rotation() {
    let (engine, _, ronda, socios) = setup("turno.wal", 3, 0).await;

    let t = engine.turno(ronda, None).await.unwrap();
    assert_eq!(t.semana, 1);
    assert_eq!(t.beneficiario_id, socios[0]);
    assert_eq!(t.pozo, 3 * APORTE);
    assert_eq!(t.responsable_id, None);

    let t3 = engine.turno(ronda, Some(3)).await.unwrap();
    assert_eq!(t3.beneficiario_id, socios[2]);
    assert_eq!(t3.orden, 3);

    let out = engine.turno(ronda, Some(4)).await;
    assert!(matches!(out, Err(EngineError::InvalidWeek { semana: 4, max: 3 })));
}

#[tokio::test]
async fn reorder_keeps_paid_out_turns() {
    let (engine, _, ronda, socios) = setup("reorder.wal", 4, 0).await;
    pay_week(&engine, ronda, &socios, 1).await;
    assert!(matches!(
        engine.cerrar_semana(ronda).await.unwrap(),
        CierreSemana::Avanzada { semana: 1, siguiente: 2 }
    ));

    // Week 1 was paid out to socios[0]; it must stay first.
    let moves_first = vec![socios[1], socios[0], socios[2], socios[3]];
    assert!(matches!(
        engine.reorder(ronda, moves_first).await,
        Err(EngineError::InvalidRoster(_))
    ));

    let incomplete = vec![socios[0], socios[1], socios[2]];
    assert!(matches!(
        engine.reorder(ronda, incomplete).await,
        Err(EngineError::InvalidRoster(_))
    ));

    let outsider = vec![socios[0], socios[1], socios[2], Ulid::new()];
    assert!(matches!(
        engine.reorder(ronda, outsider).await,
        Err(EngineError::InvalidRoster(_))
    ));

    let swapped = vec![socios[0], socios[3], socios[2], socios[1]];
    engine.reorder(ronda, swapped).await.unwrap();
    let t = engine.turno(ronda, None).await.unwrap();
    assert_eq!(t.semana, 2);
    assert_eq!(t.beneficiario_id, socios[3]);
}

#[tokio::test]
async fn responsable_per_week() {
    let (engine, _, ronda, socios) = setup("responsable.wal", 3, 0).await;

    assert_eq!(engine.set_responsable(ronda, socios[2], None).await.unwrap(), 1);
    assert_eq!(engine.set_responsable(ronda, socios[1], Some(3)).await.unwrap(), 3);
    // Upsert.
    engine.set_responsable(ronda, socios[0], Some(3)).await.unwrap();

    assert_eq!(engine.turno(ronda, Some(1)).await.unwrap().responsable_id, Some(socios[2]));
    assert_eq!(engine.turno(ronda, Some(3)).await.unwrap().responsable_id, Some(socios[0]));

    let out_of_range = engine.set_responsable(ronda, socios[0], Some(4)).await;
    assert!(matches!(out_of_range, Err(EngineError::InvalidWeek { semana: 4, max: 3 })));

    let outsider = engine.set_responsable(ronda, Ulid::new(), None).await;
    assert!(matches!(outsider, Err(EngineError::NotParticipant { .. })));
}

// ── Aportes ───────────────────────────────────────────────

#[tokio::test]
async fn aporte_rules() {
    let (engine, _, ronda, socios) = setup("aporte_rules.wal", 3, 0).await;

    let outsider = engine.record_aporte(ronda, Ulid::new(), 1, None, 0, None).await;
    assert!(matches!(outsider, Err(EngineError::NotParticipant { .. })));

    let future = engine.record_aporte(ronda, socios[0], 2, None, 0, None).await;
    assert!(matches!(future, Err(EngineError::InvalidWeek { semana: 2, max: 1 })));

    let wrong = engine.record_aporte(ronda, socios[0], 1, Some(APORTE + 1), 0, None).await;
    assert!(matches!(wrong, Err(EngineError::InvalidAmount(_))));

    let neg_multa = engine.record_aporte(ronda, socios[0], 1, None, -1, None).await;
    assert!(matches!(neg_multa, Err(EngineError::InvalidAmount(_))));

    engine
        .record_aporte(ronda, socios[0], 1, Some(APORTE), 0, None)
        .await
        .unwrap();
    // Upsert: a late payment adds the penalty to the same week.
    engine
        .record_aporte(ronda, socios[0], 1, None, 500, Some("tarde".into()))
        .await
        .unwrap();

    let semana = engine.semana(ronda, 1).await.unwrap();
    assert!(semana[0].pagado);
    assert_eq!(semana[0].monto, Some(APORTE));
    assert_eq!(semana[0].multa, 500);
    assert!(!semana[1].pagado);
    assert_eq!(semana[1].monto, None);

    let resumen = engine.resumen(ronda).await.unwrap();
    assert_eq!(resumen.total_recaudado, APORTE);
    assert_eq!(resumen.total_multas, 500);
}

#[tokio::test]
async fn earlier_weeks_stay_open_for_late_payments() {
    let (engine, _, ronda, socios) = setup("aporte_late.wal", 2, 0).await;
    pay_week(&engine, ronda, &socios, 1).await;
    engine.cerrar_semana(ronda).await.unwrap();

    // A week-1 correction after the week closed is still accepted.
    engine
        .record_aporte(ronda, socios[1], 1, None, 300, None)
        .await
        .unwrap();
    let semana = engine.semana(ronda, 1).await.unwrap();
    assert_eq!(semana[1].multa, 300);
}

// ── Weekly settlement ─────────────────────────────────────

#[tokio::test]
async fn cerrar_semana_reports_pending_members() {
    let (engine, _, ronda, socios) = setup("cierre_pendiente.wal", 3, 0).await;
    engine
        .record_aporte(ronda, socios[1], 1, None, 0, None)
        .await
        .unwrap();

    match engine.cerrar_semana(ronda).await.unwrap() {
        CierreSemana::Pendiente { semana, pendientes } => {
            assert_eq!(semana, 1);
            let ids: Vec<Ulid> = pendientes.iter().map(|p| p.socio_id).collect();
            assert_eq!(ids, vec![socios[0], socios[2]]);
            assert_eq!(pendientes[0].monto_aporte, APORTE);
            assert_eq!(pendientes[0].multa, DEFAULT_MULTA_CENTS);
            assert_eq!(pendientes[0].total_adeudado(), APORTE + DEFAULT_MULTA_CENTS);
        }
        other => panic!("expected pending members, got {other:?}"),
    }

    // Nothing moved.
    assert_eq!(engine.turno(ronda, None).await.unwrap().semana, 1);
}

#[tokio::test]
async fn full_cycle_finishes_ronda() {
    let (engine, _, ronda, socios) = setup("cierre_ciclo.wal", 3, 0).await;

    for semana in 1..=2 {
        pay_week(&engine, ronda, &socios, semana).await;
        assert_eq!(
            engine.cerrar_semana(ronda).await.unwrap(),
            CierreSemana::Avanzada { semana, siguiente: semana + 1 }
        );
    }
    pay_week(&engine, ronda, &socios, 3).await;
    assert_eq!(
        engine.cerrar_semana(ronda).await.unwrap(),
        CierreSemana::Finalizada { semana: 3 }
    );

    let info = engine.resumen(ronda).await.unwrap();
    assert!(!info.ronda.activa);
    assert_eq!(info.ronda.semana_actual, 3);
    assert!(info.ronda.fecha_fin.is_some());
    assert_eq!(info.total_recaudado, 9 * APORTE);

    // A finished ronda accepts nothing more.
    assert!(matches!(
        engine.cerrar_semana(ronda).await,
        Err(EngineError::RondaInactiva(_))
    ));
    assert!(matches!(
        engine.record_aporte(ronda, socios[0], 3, None, 0, None).await,
        Err(EngineError::RondaInactiva(_))
    ));

    // The next cycle can start.
    let codigo = engine
        .create_ronda(Ulid::new(), "Siguiente".into(), APORTE, INICIO + 30 * DAY_MS, None, None, None)
        .await
        .unwrap();
    assert_eq!(codigo, "RD0002");
    assert_eq!(engine.rondas(Some(true)).await.len(), 1);
    assert_eq!(engine.rondas(Some(false)).await.len(), 1);
}

#[tokio::test]
async fn cerrar_semana_needs_roster() {
    let engine = Engine::new(test_wal_path("cierre_vacio.wal")).unwrap();
    let ronda = Ulid::new();
    engine
        .create_ronda(ronda, "R".into(), APORTE, INICIO, None, None, None)
        .await
        .unwrap();
    assert!(matches!(
        engine.cerrar_semana(ronda).await,
        Err(EngineError::InvalidRoster(_))
    ));
    assert!(matches!(
        engine.cerrar_semana(Ulid::new()).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Ahorros ───────────────────────────────────────────────

#[tokio::test]
async fn ahorro_cap_and_once_per_week() {
    let (engine, _, ronda, socios) = setup("ahorro_cap.wal", 2, 5_000).await;
    let s = socios[0];

    engine.record_ahorro(Ulid::new(), ronda, s, 1, 3_000).await.unwrap();
    let repeated = engine.record_ahorro(Ulid::new(), ronda, s, 1, 100).await;
    assert!(matches!(repeated, Err(EngineError::AhorroRepeated { semana: 1, .. })));

    pay_week(&engine, ronda, &socios, 1).await;
    engine.cerrar_semana(ronda).await.unwrap();

    let over = engine.record_ahorro(Ulid::new(), ronda, s, 2, 2_001).await;
    assert!(matches!(over, Err(EngineError::AhorroCap { restante: 2_000 })));
    engine.record_ahorro(Ulid::new(), ronda, s, 2, 2_000).await.unwrap();

    let semana2 = engine.semana(ronda, 2).await.unwrap();
    assert_eq!(semana2[0].ahorro_acumulado, 5_000);
    assert_eq!(semana2[0].ahorro_restante, 0);
    assert!(semana2[0].ahorro_semana);
    assert!(!semana2[1].ahorro_semana);
    assert_eq!(semana2[1].ahorro_restante, 5_000);

    // Accumulated savings are as of the week asked for.
    let semana1 = engine.semana(ronda, 1).await.unwrap();
    assert_eq!(semana1[0].ahorro_acumulado, 3_000);
    assert_eq!(semana1[0].ahorro_restante, 2_000);
}

#[tokio::test]
async fn ahorro_rejects_bad_input() {
    let (engine, _, ronda, socios) = setup("ahorro_input.wal", 2, 5_000).await;
    assert!(matches!(
        engine.record_ahorro(Ulid::new(), ronda, socios[0], 1, 0).await,
        Err(EngineError::InvalidAmount(_))
    ));
    assert!(matches!(
        engine.record_ahorro(Ulid::new(), ronda, socios[0], 2, 100).await,
        Err(EngineError::InvalidWeek { .. })
    ));
    assert!(matches!(
        engine.record_ahorro(Ulid::new(), ronda, Ulid::new(), 1, 100).await,
        Err(EngineError::NotParticipant { .. })
    ));
    let id = Ulid::new();
    engine.record_ahorro(id, ronda, socios[0], 1, 100).await.unwrap();
    assert!(matches!(
        engine.record_ahorro(id, ronda, socios[1], 1, 100).await,
        Err(EngineError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn zero_objective_means_no_savings() {
    let (engine, _, ronda, socios) = setup("ahorro_zero.wal", 2, 0).await;
    assert!(matches!(
        engine.record_ahorro(Ulid::new(), ronda, socios[0], 1, 1).await,
        Err(EngineError::AhorroCap { restante: 0 })
    ));
}

#[tokio::test]
async fn free_movements_and_withdrawal_rules() {
    let (engine, _, ronda, socios) = setup("libres.wal", 2, 10_000).await;
    let s = socios[0];

    engine.record_ahorro(Ulid::new(), ronda, s, 1, 4_000).await.unwrap();
    engine.deposit(Ulid::new(), s, 1_000, Some(INICIO)).await.unwrap();
    assert_eq!(engine.saldo(s).await.unwrap(), 5_000);

    // No withdrawals while the cycle runs.
    let blocked = engine.withdraw(Ulid::new(), s, 100, None).await;
    assert!(matches!(blocked, Err(EngineError::RondaActiva(id)) if id == ronda));

    for semana in 1..=2 {
        pay_week(&engine, ronda, &socios, semana).await;
        engine.cerrar_semana(ronda).await.unwrap();
    }

    let too_much = engine.withdraw(Ulid::new(), s, 5_001, None).await;
    assert!(matches!(too_much, Err(EngineError::InsufficientBalance { saldo: 5_000 })));

    engine.withdraw(Ulid::new(), s, 4_500, None).await.unwrap();
    assert_eq!(engine.saldo(s).await.unwrap(), 500);

    assert!(matches!(
        engine.deposit(Ulid::new(), s, 0, None).await,
        Err(EngineError::InvalidAmount(_))
    ));
    assert!(matches!(
        engine.deposit(Ulid::new(), Ulid::new(), 100, None).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn ahorro_history_newest_first_with_range() {
    let engine = Engine::new(test_wal_path("ahorro_history.wal")).unwrap();
    let s = add_socio(&engine, 1).await;
    let other = add_socio(&engine, 2).await;

    engine.deposit(Ulid::new(), s, 100, Some(1_000)).await.unwrap();
    engine.deposit(Ulid::new(), s, 200, Some(3_000)).await.unwrap();
    engine.withdraw(Ulid::new(), s, 50, Some(2_000)).await.unwrap();
    engine.deposit(Ulid::new(), other, 999, Some(2_500)).await.unwrap();

    let all = engine.ahorro_history(s, None, None).await.unwrap();
    let montos: Vec<Cents> = all.iter().map(|m| m.monto).collect();
    assert_eq!(montos, vec![200, -50, 100]);
    assert!(all.iter().all(|m| m.ronda_id.is_none() && m.semana.is_none()));

    let window = engine.ahorro_history(s, Some(1_500), Some(3_000)).await.unwrap();
    let montos: Vec<Cents> = window.iter().map(|m| m.monto).collect();
    assert_eq!(montos, vec![200, -50]);

    assert!(matches!(
        engine.ahorro_history(Ulid::new(), None, None).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Express loans ─────────────────────────────────────────

#[tokio::test]
async fn prestamo_pays_the_week() {
    let (engine, _, ronda, socios) = setup("prestamo_paga.wal", 3, 0).await;
    engine.record_aporte(ronda, socios[0], 1, None, 0, None).await.unwrap();
    engine.record_aporte(ronda, socios[1], 1, None, 0, None).await.unwrap();

    let p = Ulid::new();
    engine
        .grant_prestamo(p, ronda, socios[2], 1, APORTE, 150, Some("sin efectivo".into()))
        .await
        .unwrap();

    let semana = engine.semana(ronda, 1).await.unwrap();
    assert!(semana[2].pagado);
    assert_eq!(semana[2].monto, Some(APORTE));
    assert_eq!(semana[2].prestamo_id, Some(p));

    // The loan-backed aporte cannot be overwritten.
    assert!(matches!(
        engine.record_aporte(ronda, socios[2], 1, None, 0, None).await,
        Err(EngineError::LoanBacked(id)) if id == p
    ));
    // A paid week cannot get a loan.
    assert!(matches!(
        engine.grant_prestamo(Ulid::new(), ronda, socios[0], 1, APORTE, 0, None).await,
        Err(EngineError::AlreadyPaid { semana: 1, .. })
    ));

    assert!(matches!(
        engine.cerrar_semana(ronda).await.unwrap(),
        CierreSemana::Avanzada { semana: 1, siguiente: 2 }
    ));

    let pendientes = engine.prestamos(None).await;
    assert_eq!(pendientes.len(), 1);
    assert_eq!(pendientes[0].id, p);
    assert_eq!(pendientes[0].total(), APORTE + 150);
    assert_eq!(pendientes[0].estado, EstadoPrestamo::Pendiente);
}

#[tokio::test]
async fn prestamo_lifecycle() {
    let (engine, _, ronda, socios) = setup("prestamo_ciclo.wal", 2, 0).await;
    let p = Ulid::new();
    engine.grant_prestamo(p, ronda, socios[0], 1, APORTE, 100, None).await.unwrap();
    assert!(matches!(
        engine.grant_prestamo(p, ronda, socios[1], 1, APORTE, 100, None).await,
        Err(EngineError::AlreadyExists(_))
    ));

    assert_eq!(engine.settle_prestamo(p).await.unwrap(), ronda);
    assert!(engine.prestamos(None).await.is_empty());
    assert_eq!(engine.prestamos(Some(EstadoPrestamo::Pagado)).await.len(), 1);

    assert!(matches!(
        engine.cancel_prestamo(p, false).await,
        Err(EngineError::InvalidTransition {
            from: EstadoPrestamo::Pagado,
            to: EstadoPrestamo::Cancelado,
            ..
        })
    ));
    assert!(matches!(
        engine.settle_prestamo(p).await,
        Err(EngineError::InvalidTransition { .. })
    ));
    assert!(matches!(
        engine.settle_prestamo(Ulid::new()).await,
        Err(EngineError::NotFound(_))
    ));

    // Settled loans still back their aporte.
    let semana = engine.semana(ronda, 1).await.unwrap();
    assert_eq!(semana[0].prestamo_id, Some(p));
}

#[tokio::test]
async fn cancel_with_revert_reopens_week() {
    let (engine, _, ronda, socios) = setup("prestamo_revert.wal", 2, 0).await;
    engine.record_aporte(ronda, socios[0], 1, None, 0, None).await.unwrap();
    let p = Ulid::new();
    engine.grant_prestamo(p, ronda, socios[1], 1, APORTE, 0, None).await.unwrap();

    engine.cancel_prestamo(p, true).await.unwrap();
    let semana = engine.semana(ronda, 1).await.unwrap();
    assert!(!semana[1].pagado);
    assert!(matches!(
        engine.cerrar_semana(ronda).await.unwrap(),
        CierreSemana::Pendiente { .. }
    ));
    assert_eq!(engine.prestamos(Some(EstadoPrestamo::Cancelado)).await.len(), 1);

    // The member can now pay normally.
    engine.record_aporte(ronda, socios[1], 1, None, 0, None).await.unwrap();
    assert!(matches!(
        engine.cerrar_semana(ronda).await.unwrap(),
        CierreSemana::Avanzada { .. }
    ));
}

#[tokio::test]
async fn cancel_without_revert_keeps_aporte() {
    let (engine, _, ronda, socios) = setup("prestamo_keep.wal", 2, 0).await;
    let p = Ulid::new();
    engine.grant_prestamo(p, ronda, socios[1], 1, APORTE, 0, None).await.unwrap();
    engine.cancel_prestamo(p, false).await.unwrap();

    let semana = engine.semana(ronda, 1).await.unwrap();
    assert!(semana[1].pagado);
    assert_eq!(semana[1].prestamo_id, None);
    // Detached: a plain aporte now, so it can be edited.
    engine.record_aporte(ronda, socios[1], 1, None, 200, None).await.unwrap();
}

#[tokio::test]
async fn revert_refused_on_closed_week() {
    let (engine, _, ronda, socios) = setup("prestamo_cerrada.wal", 2, 0).await;
    engine.record_aporte(ronda, socios[0], 1, None, 0, None).await.unwrap();
    let p = Ulid::new();
    engine.grant_prestamo(p, ronda, socios[1], 1, APORTE, 0, None).await.unwrap();
    engine.cerrar_semana(ronda).await.unwrap();

    assert!(matches!(
        engine.cancel_prestamo(p, true).await,
        Err(EngineError::WeekClosed(1))
    ));
    // Without revert it goes through and the week stays paid.
    engine.cancel_prestamo(p, false).await.unwrap();
    assert!(engine.semana(ronda, 1).await.unwrap()[1].pagado);
}

#[tokio::test]
async fn prestamos_listed_newest_first() {
    let (engine, _, ronda, socios) = setup("prestamo_lista.wal", 3, 0).await;
    let mut ids = Vec::new();
    for s in &socios {
        let id = Ulid::new();
        engine.grant_prestamo(id, ronda, *s, 1, APORTE, 0, None).await.unwrap();
        ids.push(id);
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    let listed: Vec<Ulid> = engine.prestamos(None).await.iter().map(|p| p.id).collect();
    ids.reverse();
    assert_eq!(listed, ids);
}

// ── Reports ───────────────────────────────────────────────

#[tokio::test]
async fn weekly_and_member_reports() {
    let (engine, _, ronda, socios) = setup("reportes.wal", 3, 10_000).await;
    engine.set_responsable(ronda, socios[1], Some(1)).await.unwrap();
    pay_week(&engine, ronda, &socios, 1).await;
    engine.record_aporte(ronda, socios[2], 1, None, 1_000, None).await.unwrap();
    engine.record_ahorro(Ulid::new(), ronda, socios[0], 1, 700).await.unwrap();
    engine.cerrar_semana(ronda).await.unwrap();
    engine.record_aporte(ronda, socios[0], 2, None, 0, None).await.unwrap();

    let semanas = engine.semanas(ronda).await.unwrap();
    assert_eq!(semanas.len(), 3);
    assert_eq!(semanas[0].total_aportes, 3 * APORTE);
    assert_eq!(semanas[0].total_multas, 1_000);
    assert_eq!(semanas[0].total_ahorros, 700);
    assert_eq!(semanas[0].beneficiario_id, Some(socios[0]));
    assert_eq!(semanas[0].responsable_id, Some(socios[1]));
    assert_eq!(semanas[1].total_aportes, APORTE);
    assert_eq!(semanas[2].total_aportes, 0);

    let resultados = engine.resultados(ronda).await.unwrap();
    assert_eq!(resultados[0].aportes, 2 * APORTE);
    assert_eq!(resultados[0].ahorros, 700);
    assert_eq!(resultados[2].multas, 1_000);
    assert_eq!(resultados[2].orden, 3);

    let resumen = engine.resumen(ronda).await.unwrap();
    assert_eq!(resumen.total_recaudado, 4 * APORTE);
    assert_eq!(resumen.total_multas, 1_000);
    assert_eq!(resumen.total_ahorros, 700);
    assert_eq!(resumen.ronda.codigo, "RD0001");

    let socios_info = engine.socios(Some(ronda)).await.unwrap();
    assert_eq!(socios_info.len(), 3);
    let third = socios_info.iter().find(|i| i.socio.id == socios[2]).unwrap();
    assert_eq!(third.multas, 1_000);
    let first = socios_info.iter().find(|i| i.socio.id == socios[0]).unwrap();
    assert_eq!(first.ahorros, 700);

    assert!(matches!(
        engine.socios(Some(Ulid::new())).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn socios_totals_span_rondas_and_free_savings() {
    let (engine, _, ronda, socios) = setup("socios_global.wal", 2, 10_000).await;
    engine.record_ahorro(Ulid::new(), ronda, socios[0], 1, 1_000).await.unwrap();
    engine.deposit(Ulid::new(), socios[0], 250, None).await.unwrap();

    let all = engine.socios(None).await.unwrap();
    let first = all.iter().find(|i| i.socio.id == socios[0]).unwrap();
    assert_eq!(first.ahorros, 1_250);

    let scoped = engine.socios(Some(ronda)).await.unwrap();
    let first = scoped.iter().find(|i| i.socio.id == socios[0]).unwrap();
    assert_eq!(first.ahorros, 1_000);
}

#[tokio::test]
async fn rondas_newest_first() {
    let engine = Engine::new(test_wal_path("rondas_orden.wal")).unwrap();
    let a = add_socio(&engine, 1).await;
    let b = add_socio(&engine, 2).await;

    for (i, inicio) in [INICIO, INICIO + 100 * DAY_MS].into_iter().enumerate() {
        let ronda = Ulid::new();
        engine
            .create_ronda(ronda, format!("R{i}"), APORTE, inicio, None, None, None)
            .await
            .unwrap();
        engine
            .assign_participants(ronda, vec![(a, Some(1)), (b, Some(2))])
            .await
            .unwrap();
        for semana in 1..=2 {
            pay_week(&engine, ronda, &[a, b], semana).await;
            engine.cerrar_semana(ronda).await.unwrap();
        }
    }
    let rondas = engine.rondas(None).await;
    let codigos: Vec<&str> = rondas.iter().map(|r| r.codigo.as_str()).collect();
    assert_eq!(codigos, vec!["RD0002", "RD0001"]);
    assert!(engine.rondas(Some(true)).await.is_empty());
}

// ── Durability ────────────────────────────────────────────

#[tokio::test]
async fn replay_restores_state() {
    let (engine, path, ronda, socios) = setup("replay.wal", 3, 5_000).await;
    engine.set_responsable(ronda, socios[0], None).await.unwrap();
    pay_week(&engine, ronda, &socios, 1).await;
    engine.record_ahorro(Ulid::new(), ronda, socios[1], 1, 2_500).await.unwrap();
    engine.cerrar_semana(ronda).await.unwrap();
    let p = Ulid::new();
    engine.grant_prestamo(p, ronda, socios[2], 2, APORTE, 100, None).await.unwrap();
    let resumen_before = engine.resumen(ronda).await.unwrap();
    let semana_before = engine.semana(ronda, 2).await.unwrap();
    drop(engine);

    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.resumen(ronda).await.unwrap(), resumen_before);
    assert_eq!(engine.semana(ronda, 2).await.unwrap(), semana_before);
    assert_eq!(engine.next_codigo().await, "RD0002");
    assert_eq!(engine.get_ronda_for_prestamo(&p), Some(ronda));
    assert_eq!(engine.turno(ronda, None).await.unwrap().responsable_id, None);
    assert_eq!(engine.turno(ronda, Some(1)).await.unwrap().responsable_id, Some(socios[0]));

    // Still one active ronda after restart.
    assert!(matches!(
        engine
            .create_ronda(Ulid::new(), "X".into(), APORTE, INICIO, None, None, None)
            .await,
        Err(EngineError::RondaActiva(_))
    ));
}

/// Everything a client can observe about a tenant.
async fn snapshot(engine: &Engine, rondas: &[Ulid], socios: &[Ulid]) -> String {
    let mut out = String::new();
    out += &format!("{:?}\n", engine.rondas(None).await);
    out += &format!("{:?}\n", engine.socios(None).await.unwrap());
    out += &format!("{:?}\n", engine.next_codigo().await);
    for estado in [EstadoPrestamo::Pendiente, EstadoPrestamo::Pagado, EstadoPrestamo::Cancelado] {
        out += &format!("{:?}\n", engine.prestamos(Some(estado)).await);
    }
    for r in rondas {
        out += &format!("{:?}\n", engine.participantes(*r).await.unwrap());
        out += &format!("{:?}\n", engine.semanas(*r).await.unwrap());
        out += &format!("{:?}\n", engine.resultados(*r).await.unwrap());
        out += &format!("{:?}\n", engine.resumen(*r).await.unwrap());
        for semana in 1..=engine.resumen(*r).await.unwrap().duracion_semanas {
            out += &format!("{:?}\n", engine.semana(*r, semana).await.unwrap());
        }
    }
    for s in socios {
        out += &format!("{:?}\n", engine.ahorro_history(*s, None, None).await.unwrap());
    }
    out
}

#[tokio::test]
async fn compact_wal_preserves_state() {
    let path = test_wal_path("compact_state.wal");
    let engine = Engine::new(path.clone()).unwrap();
    let socios = [
        add_socio(&engine, 1).await,
        add_socio(&engine, 2).await,
        add_socio(&engine, 3).await,
    ];

    // A finished ronda with churn.
    let vieja = Ulid::new();
    engine
        .create_ronda(vieja, "Vieja".into(), APORTE, INICIO, Some(3_000), Some(14), Some(500))
        .await
        .unwrap();
    engine
        .assign_participants(vieja, socios.iter().map(|s| (*s, None)).collect())
        .await
        .unwrap();
    let orden: Vec<Ulid> = engine
        .participantes(vieja)
        .await
        .unwrap()
        .iter()
        .map(|p| p.socio_id)
        .collect();
    engine.reorder(vieja, vec![orden[2], orden[1], orden[0]]).await.unwrap();
    for semana in 1..=3 {
        // Grant and revert a loan, then pay it for real.
        let tmp = Ulid::new();
        engine.grant_prestamo(tmp, vieja, socios[0], semana, APORTE, 10, None).await.unwrap();
        engine.cancel_prestamo(tmp, true).await.unwrap();
        pay_week(&engine, vieja, &socios, semana).await;
        engine.record_ahorro(Ulid::new(), vieja, socios[1], semana, 1_000).await.unwrap();
        engine.set_responsable(vieja, socios[2], Some(semana)).await.unwrap();
        engine.cerrar_semana(vieja).await.unwrap();
    }
    engine.withdraw(Ulid::new(), socios[1], 1_500, Some(INICIO + 50 * DAY_MS)).await.unwrap();

    // A running ronda with loans in every state.
    let nueva = Ulid::new();
    engine
        .create_ronda(nueva, "Nueva".into(), APORTE, INICIO + 60 * DAY_MS, Some(9_000), None, None)
        .await
        .unwrap();
    engine
        .assign_participants(nueva, socios.iter().enumerate().map(|(i, s)| (*s, Some(i as u32 + 1))).collect())
        .await
        .unwrap();
    let pagado = Ulid::new();
    engine.grant_prestamo(pagado, nueva, socios[0], 1, APORTE, 50, None).await.unwrap();
    engine.settle_prestamo(pagado).await.unwrap();
    let suelto = Ulid::new();
    engine.grant_prestamo(suelto, nueva, socios[1], 1, APORTE, 0, Some("luego".into())).await.unwrap();
    engine.cancel_prestamo(suelto, false).await.unwrap();
    engine.record_aporte(nueva, socios[2], 1, None, 0, None).await.unwrap();
    engine.cerrar_semana(nueva).await.unwrap();
    let vivo = Ulid::new();
    engine.grant_prestamo(vivo, nueva, socios[2], 2, APORTE, 75, None).await.unwrap();
    engine.deposit(Ulid::new(), socios[0], 4_000, Some(INICIO + 61 * DAY_MS)).await.unwrap();

    let rondas = [vieja, nueva];
    let before = snapshot(&engine, &rondas, &socios).await;
    let size_before = std::fs::metadata(&path).unwrap().len();

    engine.compact_wal().await.unwrap();

    let size_after = std::fs::metadata(&path).unwrap().len();
    assert!(size_after < size_before, "compacted WAL ({size_after}) should be smaller than original ({size_before})");
    assert_eq!(snapshot(&engine, &rondas, &socios).await, before);
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    // Restart from the compacted log, then keep going.
    drop(engine);
    let engine = Engine::new(path.clone()).unwrap();
    assert_eq!(snapshot(&engine, &rondas, &socios).await, before);
    assert_eq!(engine.get_ronda_for_prestamo(&vivo), Some(nueva));
    engine.settle_prestamo(vivo).await.unwrap();
    pay_week(&engine, nueva, &socios[..2], 2).await;
    assert!(matches!(
        engine.cerrar_semana(nueva).await.unwrap(),
        CierreSemana::Avanzada { semana: 2, siguiente: 3 }
    ));

    let after_restart = snapshot(&engine, &rondas, &socios).await;
    drop(engine);
    let engine = Engine::new(path).unwrap();
    assert_eq!(snapshot(&engine, &rondas, &socios).await, after_restart);
}

#[tokio::test]
async fn group_commit_batches_appends() {
    let path = test_wal_path("group_commit_batch.wal");
    let engine = Arc::new(Engine::new(path.clone()).unwrap());

    let n = 20;
    let mut handles = Vec::new();
    for i in 0..n {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.create_socio(Socio {
                id: Ulid::new(),
                numero_cuenta: format!("G-{i}"),
                cedula: format!("G{i:09}"),
                nombres: "N".into(),
                apellidos: "A".into(),
                edad: None,
            })
            .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(engine.socios(None).await.unwrap().len(), n);

    let engine2 = Engine::new(path).unwrap();
    assert_eq!(engine2.socios(None).await.unwrap().len(), n);
}

#[tokio::test]
async fn concurrent_aportes_then_close() {
    let (engine, _, ronda, socios) = setup("concurrent_aportes.wal", 30, 0).await;
    let engine = Arc::new(engine);

    let mut handles = Vec::new();
    for s in socios.clone() {
        let eng = engine.clone();
        handles.push(tokio::spawn(async move {
            eng.record_aporte(ronda, s, 1, None, 0, None).await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }
    assert_eq!(
        engine.cerrar_semana(ronda).await.unwrap(),
        CierreSemana::Avanzada { semana: 1, siguiente: 2 }
    );
    assert_eq!(engine.semanas(ronda).await.unwrap()[0].total_aportes, 30 * APORTE);
}

#[tokio::test]
async fn wal_appends_since_compact_through_channel() {
    let path = test_wal_path("appends_counter.wal");
    let engine = Engine::new(path).unwrap();
    assert_eq!(engine.wal_appends_since_compact().await, 0);

    add_socio(&engine, 1).await;
    engine
        .create_ronda(Ulid::new(), "R".into(), APORTE, INICIO, None, None, None)
        .await
        .unwrap();
    // Rejected operations never reach the log.
    let _ = engine
        .create_ronda(Ulid::new(), "R2".into(), APORTE, INICIO, None, None, None)
        .await;

    assert_eq!(engine.wal_appends_since_compact().await, 2);
}

#[tokio::test]
async fn writes_after_torn_tail_survive_restart() {
    let path = test_wal_path("torn_restart.wal");
    let a = {
        let engine = Engine::new(path.clone()).unwrap();
        add_socio(&engine, 1).await
    };
    {
        use std::io::Write;
        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(&[3u8, 0, 0]).unwrap();
    }

    let b = {
        let engine = Engine::new(path.clone()).unwrap();
        add_socio(&engine, 2).await
    };

    let engine = Engine::new(path).unwrap();
    let ids: Vec<Ulid> = engine.socios(None).await.unwrap().iter().map(|s| s.socio.id).collect();
    assert!(ids.contains(&a));
    assert!(ids.contains(&b));
}
