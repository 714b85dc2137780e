//! Liveness and readiness probes.
//!
//! `/healthz` never touches storage. `/readyz` reports one entry per check
//! and answers 503 as soon as any of them fails.

use crate::{db, state::AppState};
use axum::{Json, extract::State, http::StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Serialize)]
pub struct Probe {
    status: &'static str,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    checks: BTreeMap<&'static str, Check>,
}

#[derive(Serialize)]
struct Check {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Check {
    fn from_result(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self { ok: true, error: None },
            Err(error) => Self {
                ok: false,
                error: Some(error),
            },
        }
    }
}

/// `GET /healthz`
pub async fn healthz() -> Json<Probe> {
    Json(Probe {
        status: "ok",
        checks: BTreeMap::new(),
    })
}

/// `GET /readyz`: pool answers a query and both store tables exist.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<Probe>) {
    let connectivity = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.db)
        .await
        .map_err(|e| e.to_string())
        .and_then(|v| match v {
            1 => Ok(()),
            other => Err(format!("unexpected result: {}", other)),
        });

    let schema = match db::schema_ready(&state.db).await {
        Ok(true) => Ok(()),
        Ok(false) => Err("tables missing, run with --migrate".to_string()),
        Err(e) => Err(e.to_string()),
    };

    let checks = BTreeMap::from([
        ("sqlite", Check::from_result(connectivity)),
        ("schema", Check::from_result(schema)),
    ]);
    let ready = checks.values().all(|check| check.ok);

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let probe = Probe {
        status: if ready { "ok" } else { "error" },
        checks,
    };
    (status, Json(probe))
}
