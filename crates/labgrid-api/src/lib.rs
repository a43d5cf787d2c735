//! labgrid-api: REST API for labgrid.
//!
//! Provides axum route handlers for registering templates, deploying and
//! tearing down tables, and inspecting the ledger.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/templates` | List templates in registration order |
//! | POST | `/api/v1/templates` | Register (or update) a template |
//! | GET | `/api/v1/tables` | List tables with their resources |
//! | GET | `/api/v1/tables/{n}` | Get one table |
//! | PUT | `/api/v1/tables/{n}/label` | Set or clear a table's label |
//! | GET | `/api/v1/resources` | List every recorded resource |
//! | POST | `/api/v1/deploy/table/{n}` | Deploy one table |
//! | POST | `/api/v1/deploy/bulk?start_table=&end_table=` | Deploy a range of tables |
//! | DELETE | `/api/v1/table/{n}` | Tear down a table |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post, put};
use labgrid_orchestrator::Orchestrator;
use labgrid_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub orchestrator: Arc<Orchestrator>,
}

impl ApiState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self {
            store: orchestrator.state().clone(),
            orchestrator,
        }
    }
}

/// Build the complete API router.
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    let api_state = ApiState::new(orchestrator);

    let api_routes = Router::new()
        .route("/templates", get(handlers::list_templates).post(handlers::register_template))
        .route("/tables", get(handlers::list_tables))
        .route("/tables/{n}", get(handlers::get_table))
        .route("/tables/{n}/label", put(handlers::set_table_label))
        .route("/resources", get(handlers::list_resources))
        .route("/deploy/table/{n}", post(handlers::deploy_table))
        .route("/deploy/bulk", post(handlers::deploy_bulk))
        .route("/table/{n}", delete(handlers::delete_table))
        .with_state(api_state);

    Router::new().nest("/api/v1", api_routes)
}
