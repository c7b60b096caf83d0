use serde_json::Value;
use std::rc::Rc;
use tracing::{info, instrument, warn};

use crate::capabilities::HttpMethod;
use crate::context::ClientContext;
use crate::error::{AppError, AppResult, ErrorKind};
use crate::model::{CaseFields, CaseId, CaseStatus, Confirmation, EmergencyCase};

/// REST access to emergency requests.
pub struct EmergencyRepository {
    ctx: Rc<ClientContext>,
}

impl EmergencyRepository {
    pub fn new(ctx: Rc<ClientContext>) -> Self {
        Self { ctx }
    }

    /// Submit a new request on behalf of the signed-in requester.
    #[instrument(skip(self, case_fields), fields(species = %case_fields.species))]
    pub async fn create(&self, case_fields: &CaseFields) -> AppResult<EmergencyCase> {
        case_fields.validate().map_err(AppError::validation)?;
        let request = self
            .ctx
            .authorized(HttpMethod::Post, "/emergency-requests")?
            .with_json(case_fields)?;
        let case: EmergencyCase = self
            .ctx
            .send_json(request, "Could not submit the emergency request")
            .await?;
        info!(case_id = %case.id, "emergency request created");
        Ok(case)
    }

    /// Every case tied to the current identity, whatever its role. Rows that
    /// fail to decode are dropped with a warning.
    #[instrument(skip(self))]
    pub async fn list_mine(&self) -> AppResult<Vec<EmergencyCase>> {
        let request = self
            .ctx
            .authorized(HttpMethod::Get, "/emergency-requests/my")?;
        let rows: Vec<Value> = self
            .ctx
            .send_json(request, "Could not load emergency requests")
            .await?;

        let total = rows.len();
        let cases: Vec<EmergencyCase> = rows
            .into_iter()
            .filter_map(|row| {
                let id = row.get("id").map(ToString::to_string).unwrap_or_default();
                match serde_json::from_value(row) {
                    Ok(case) => Some(case),
                    Err(e) => {
                        warn!(case_id = %id, error = %e, "skipping malformed case");
                        None
                    }
                }
            })
            .collect();
        if cases.len() < total {
            warn!(skipped = total - cases.len(), "some cases were not shown");
        }
        Ok(cases)
    }

    /// Accept a pending case. When the caller already knows the case's status
    /// and it cannot move to accepted, the request is refused locally.
    /// Otherwise it is sent, repeated calls included, and whatever the server
    /// answers is surfaced.
    #[instrument(skip(self))]
    pub async fn accept(
        &self,
        case_id: &CaseId,
        known_status: Option<CaseStatus>,
    ) -> AppResult<Confirmation> {
        if let Some(status) = known_status {
            status
                .validate_transition(CaseStatus::Accepted)
                .map_err(|e| {
                    AppError::new(ErrorKind::Conflict, "This request can no longer be accepted")
                        .with_internal(e.to_string())
                        .with_context("case_id", case_id.to_string())
                })?;
        }
        let request = self
            .ctx
            .authorized(HttpMethod::Put, &format!("/emergency-requests/{case_id}"))?
            .with_json(&serde_json::json!({ "status": CaseStatus::Accepted.as_str() }))?;
        let body = self
            .ctx
            .send_value(request, "Could not accept the emergency request")
            .await?;
        let confirmation = Confirmation::from_value(&body, "Emergency request accepted");
        info!(%case_id, "emergency request accepted");
        Ok(confirmation)
    }

    /// The case whose chat is shown: the first accepted one.
    pub fn active_case(cases: &[EmergencyCase]) -> Option<&EmergencyCase> {
        cases.iter().find(|c| c.has_chat())
    }
}
