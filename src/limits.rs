use crate::model::{Cents, Ms};

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_SOCIOS_PER_TENANT: usize = 10_000;
pub const MAX_RONDAS_PER_TENANT: usize = 1_000;
pub const MAX_PARTICIPANTS: usize = 200;
pub const MIN_PARTICIPANTS: usize = 2;
pub const MAX_BATCH_SIZE: usize = 200;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_OBSERVACIONES_LEN: usize = 1024;

/// 10^12 cents. Keeps every sum of a ronda far away from i64 overflow.
pub const MAX_AMOUNT_CENTS: Cents = 1_000_000_000_000;

/// Latest accepted date: 9999-12-31T23:59:59.999Z.
pub const MAX_FECHA_MS: Ms = 253_402_300_799_999;
pub const MAX_EDAD: u32 = 150;

pub const DAY_MS: Ms = 86_400_000;
pub const DEFAULT_INTERVALO_DIAS: u32 = 7;
pub const MAX_INTERVALO_DIAS: u32 = 366;

/// Penalty charged for a missed week when the ronda does not set its own.
pub const DEFAULT_MULTA_CENTS: Cents = 10_000;

pub const CODIGO_PREFIX: &str = "RD";
