// src/docs.rs

use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::OpenApi;

use crate::handlers;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    paths(
        // --- Data ---
        handlers::data::list_records,
        handlers::data::get_record,
        handlers::data::create_record,

        // --- Audit ---
        handlers::audit::list_enforced,
        handlers::audit::get_report,
        handlers::audit::verify_blocking,
        handlers::audit::verify_isolation,
    ),
    components(
        schemas(
            // --- Data ---
            models::tenancy::DataRecord,
            models::context::ScopedContext,

            // --- Audit ---
            models::audit::EnforcementState,
            models::audit::BlockingCheck,
            models::audit::IsolationCheck,
            models::audit::IsolationCheckRequest,
            models::audit::AuditReport,
        )
    ),
    tags(
        (name = "Data", description = "Acesso a dados sempre filtrado pelo contexto de tenant"),
        (name = "Audit", description = "Auditoria de isolamento (uso operacional)")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl utoipa::Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "audit_token",
            SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
        );
    }
}
