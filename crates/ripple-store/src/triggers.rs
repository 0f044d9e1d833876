//! Row triggers that publish entity changes on the notification channel.
//!
//! Each trigger fires after every insert, update and delete and emits
//! `{"table", "operation", "owner_id", "data"}` as JSON text. Weights carry
//! no owner column, so their owner is looked up through `animals`; the
//! lookup yields null when the parent row is already gone.

use crate::StoreError;
use sqlx::{Executor, PgPool};
use tracing::info;

/// Longest identifier PostgreSQL keeps without truncation.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Check that `channel` is a plain, unquoted SQL identifier.
///
/// # Errors
///
/// Returns [`StoreError::InvalidChannel`] otherwise.
pub fn validate_channel(channel: &str) -> Result<(), StoreError> {
    let mut chars = channel.chars();
    let valid_start = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid_start && valid_rest && channel.len() <= MAX_IDENTIFIER_LENGTH {
        Ok(())
    } else {
        Err(StoreError::InvalidChannel(channel.to_string()))
    }
}

fn animal_function(channel: &str) -> String {
    format!(
        r#"
CREATE OR REPLACE FUNCTION notify_animal_change()
RETURNS trigger AS $$
DECLARE
    owner_id text;
BEGIN
    IF TG_OP = 'DELETE' THEN
        owner_id = OLD.owner_id;
    ELSE
        owner_id = NEW.owner_id;
    END IF;

    PERFORM pg_notify(
        '{channel}',
        json_build_object(
            'table', 'animals',
            'operation', TG_OP,
            'owner_id', owner_id,
            'data', CASE
                WHEN TG_OP = 'DELETE' THEN json_build_object('id', OLD.id)
                ELSE json_build_object(
                    'id', NEW.id,
                    'name', NEW.name,
                    'owner_id', NEW.owner_id,
                    'created_at', NEW.created_at,
                    'updated_at', NEW.updated_at
                )
            END
        )::text
    );
    RETURN NULL;
END;
$$ LANGUAGE plpgsql;
"#
    )
}

fn weight_function(channel: &str) -> String {
    format!(
        r#"
CREATE OR REPLACE FUNCTION notify_weight_change()
RETURNS trigger AS $$
DECLARE
    owner_id text;
BEGIN
    IF TG_OP = 'DELETE' THEN
        SELECT a.owner_id INTO owner_id FROM animals a WHERE a.id = OLD.animal_id;
    ELSE
        SELECT a.owner_id INTO owner_id FROM animals a WHERE a.id = NEW.animal_id;
    END IF;

    PERFORM pg_notify(
        '{channel}',
        json_build_object(
            'table', 'weights',
            'operation', TG_OP,
            'owner_id', owner_id,
            'data', CASE
                WHEN TG_OP = 'DELETE' THEN json_build_object(
                    'id', OLD.id,
                    'animal_id', OLD.animal_id
                )
                ELSE json_build_object(
                    'id', NEW.id,
                    'animal_id', NEW.animal_id,
                    'weight', NEW.weight,
                    'date', NEW.date,
                    'created_at', NEW.created_at,
                    'updated_at', NEW.updated_at
                )
            END
        )::text
    );
    RETURN NULL;
END;
$$ LANGUAGE plpgsql;
"#
    )
}

/// Statements that (re)create both functions and both triggers.
fn install_statements(channel: &str) -> Vec<String> {
    vec![
        animal_function(channel),
        weight_function(channel),
        "DROP TRIGGER IF EXISTS animal_changes ON animals".to_string(),
        "CREATE TRIGGER animal_changes AFTER INSERT OR UPDATE OR DELETE ON animals \
         FOR EACH ROW EXECUTE FUNCTION notify_animal_change()"
            .to_string(),
        "DROP TRIGGER IF EXISTS weight_changes ON weights".to_string(),
        "CREATE TRIGGER weight_changes AFTER INSERT OR UPDATE OR DELETE ON weights \
         FOR EACH ROW EXECUTE FUNCTION notify_weight_change()"
            .to_string(),
    ]
}

const UNINSTALL_STATEMENTS: [&str; 4] = [
    "DROP TRIGGER IF EXISTS animal_changes ON animals",
    "DROP TRIGGER IF EXISTS weight_changes ON weights",
    "DROP FUNCTION IF EXISTS notify_animal_change()",
    "DROP FUNCTION IF EXISTS notify_weight_change()",
];

/// Install the change triggers, publishing on `channel`.
///
/// Idempotent: existing functions and triggers are replaced. Runs in one
/// transaction.
///
/// # Errors
///
/// Returns an error if `channel` is not a plain identifier or any statement
/// fails; nothing is changed in that case.
pub async fn install_triggers(pool: &PgPool, channel: &str) -> Result<(), StoreError> {
    validate_channel(channel)?;

    let mut tx = pool.begin().await?;
    for statement in install_statements(channel) {
        (&mut *tx).execute(statement.as_str()).await?;
    }
    tx.commit().await?;

    info!(channel, "Change triggers installed");
    Ok(())
}

/// Drop the change triggers and their functions.
///
/// # Errors
///
/// Returns an error if any statement fails.
pub async fn uninstall_triggers(pool: &PgPool) -> Result<(), StoreError> {
    let mut tx = pool.begin().await?;
    for statement in UNINSTALL_STATEMENTS {
        (&mut *tx).execute(statement).await?;
    }
    tx.commit().await?;

    info!("Change triggers removed");
    Ok(())
}
