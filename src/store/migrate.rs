//! Schema migrations.
//!
//! A migration counter in the metadata keyspace records the schema level
//! of an opened database. Pending migrations run before the store accepts
//! traffic. Migration 1 seeds the store generation: a random non-zero
//! server version (so a reset store invalidates outstanding sync cursors)
//! and a zero latest record version.

use rand::Rng;

use crate::core::error::BrokerResult;
use crate::engine::{Batch, Engine};

use super::keyspace::{decode_u64, encode_u64, metadata};

/// Current schema level.
pub const CURRENT_MIGRATION: u64 = 1;

/// Apply any pending migrations.
pub fn run(engine: &dyn Engine) -> BrokerResult<()> {
    let mut level = match engine.get(&metadata::migration_key())? {
        Some(value) => decode_u64(&value)?,
        None => 0,
    };

    while level < CURRENT_MIGRATION {
        level += 1;
        let mut batch = Batch::new();
        match level {
            1 => initialize_versions(engine, &mut batch)?,
            _ => unreachable!("unknown migration level {level}"),
        }
        batch.set(metadata::migration_key(), encode_u64(level).to_vec());
        engine.commit(batch)?;
        tracing::info!(level, "applied storage migration");
    }

    Ok(())
}

fn initialize_versions(engine: &dyn Engine, batch: &mut Batch) -> BrokerResult<()> {
    if engine.get(&metadata::server_version_key())?.is_none() {
        let mut rng = rand::thread_rng();
        let server_version: u64 = rng.gen_range(1..u64::MAX);
        batch.set(
            metadata::server_version_key(),
            encode_u64(server_version).to_vec(),
        );
    }
    if engine.get(&metadata::latest_record_version_key())?.is_none() {
        batch.set(
            metadata::latest_record_version_key(),
            encode_u64(0).to_vec(),
        );
    }
    Ok(())
}
