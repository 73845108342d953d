//! Admission HTTP handlers.
//!
//! Every request is answered with a well-formed admission review, also when the
//! body or the embedded object cannot be decoded.

use crate::validation::{FloatingIPValidator, ValidationResult, validate_floating_ip_pool};
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use crds::{FloatingIP, FloatingIPPool};
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Path of the FloatingIP webhook
pub const VALIDATE_FLOATING_IP_PATH: &str = "/validate-floatingip";

/// Path of the FloatingIPPool webhook
pub const VALIDATE_FLOATING_IP_POOL_PATH: &str = "/validate-floatingippool";

type Review = AdmissionReview<DynamicObject>;

/// Create the webhook router
pub fn router(validator: Arc<FloatingIPValidator>) -> Router {
    Router::new()
        .route("/readyz", get(readyz))
        .route(VALIDATE_FLOATING_IP_PATH, post(review_floating_ip))
        .route(VALIDATE_FLOATING_IP_POOL_PATH, post(review_floating_ip_pool))
        .with_state(validator)
}

async fn readyz() -> &'static str {
    "ok"
}

async fn review_floating_ip(
    State(validator): State<Arc<FloatingIPValidator>>,
    payload: Result<Json<Review>, JsonRejection>,
) -> Json<Review> {
    let request = match admission_request(payload) {
        Ok(request) => request,
        Err(review) => return Json(review),
    };

    let result = match decode_object::<FloatingIP>(&request, "FloatingIP") {
        Ok(fip) => validator.validate_floating_ip(&fip).await,
        Err(message) => ValidationResult::denied(message),
    };
    Json(respond(&request, result, "FloatingIP"))
}

async fn review_floating_ip_pool(payload: Result<Json<Review>, JsonRejection>) -> Json<Review> {
    let request = match admission_request(payload) {
        Ok(request) => request,
        Err(review) => return Json(review),
    };

    let result = match decode_object::<FloatingIPPool>(&request, "FloatingIPPool") {
        Ok(pool) => validate_floating_ip_pool(&pool.spec),
        Err(message) => ValidationResult::denied(message),
    };
    Json(respond(&request, result, "FloatingIPPool"))
}

fn admission_request(
    payload: Result<Json<Review>, JsonRejection>,
) -> Result<AdmissionRequest<DynamicObject>, Review> {
    let Json(review) = payload.map_err(|e| {
        error!("Cannot decode AdmissionReview: {}", e);
        AdmissionResponse::invalid(format!("cannot decode AdmissionReview: {e}")).into_review()
    })?;

    review.try_into().map_err(|e| {
        error!("Invalid AdmissionReview: {}", e);
        AdmissionResponse::invalid(format!("invalid AdmissionReview: {e}")).into_review()
    })
}

fn decode_object<K>(request: &AdmissionRequest<DynamicObject>, kind: &str) -> Result<K, String>
where
    K: kube::Resource + DeserializeOwned,
{
    let object = request.object.clone().ok_or_else(|| {
        error!(uid = %request.uid, "Admission request carries no object");
        "internal server error: admission request carries no object".to_string()
    })?;

    object.try_parse::<K>().map_err(|e| {
        error!(uid = %request.uid, "Cannot decode {}: {}", kind, e);
        format!("internal server error: cannot decode {kind}: {e}")
    })
}

fn respond(
    request: &AdmissionRequest<DynamicObject>,
    result: ValidationResult,
    kind: &str,
) -> Review {
    let response = AdmissionResponse::from(request);
    if result.allowed {
        debug!(uid = %request.uid, name = %request.name, "{} admitted", kind);
        return response.into_review();
    }

    let message = result.message.unwrap_or_default();
    warn!(uid = %request.uid, name = %request.name, "{} request not allowed: {}", kind, message);
    response.deny(message).into_review()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::floating_ip::tests::{StaticLookup, fip, pool, quota};
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app() -> Router {
        let lookup = Arc::new(
            StaticLookup::default()
                .with_pool(pool("P", "10.0.0.0/24", "10.0.0.10", "10.0.0.20", &[], &[], 3))
                .with_quota(quota("J", "P", 1, Some(1))),
        );
        let validator = FloatingIPValidator::new(lookup.clone(), lookup)
            .with_quota_settle_delay(Duration::ZERO);
        router(Arc::new(validator))
    }

    fn review(resource: &str, kind: &str, object: Value) -> Value {
        json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "b2a3c1d4",
                "kind": { "group": "rancher.k8s.binbash.org", "version": "v1beta1", "kind": kind },
                "resource": {
                    "group": "rancher.k8s.binbash.org",
                    "version": "v1beta1",
                    "resource": resource
                },
                "name": "web",
                "operation": "CREATE",
                "userInfo": { "username": "admin" },
                "object": object
            }
        })
    }

    async fn post_json(path: &str, body: String) -> Value {
        let response = app()
            .oneshot(
                Request::post(path)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_readyz() {
        let response = app()
            .oneshot(Request::get("/readyz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn test_floating_ip_quota_exceeded() {
        let object = serde_json::to_value(fip("P", None, Some("J"))).unwrap();
        let body = review("floatingips", "FloatingIP", object).to_string();

        let answer = post_json(VALIDATE_FLOATING_IP_PATH, body).await;

        assert_eq!(answer["response"]["uid"], "b2a3c1d4");
        assert_eq!(answer["response"]["allowed"], false);
        assert!(answer.to_string().contains(
            "quota exceeded for floatingippool P in project J. Quota: 1, Used: 1"
        ));
    }

    #[tokio::test]
    async fn test_floating_ip_missing_pool() {
        let object = serde_json::to_value(fip("missing", None, Some("J"))).unwrap();
        let body = review("floatingips", "FloatingIP", object).to_string();

        let answer = post_json(VALIDATE_FLOATING_IP_PATH, body).await;

        assert_eq!(answer["response"]["allowed"], false);
        assert!(
            answer
                .to_string()
                .contains("the specified floatingippool missing does not exist")
        );
    }

    #[tokio::test]
    async fn test_undecodable_object_is_denied() {
        let object = json!({
            "apiVersion": "rancher.k8s.binbash.org/v1beta1",
            "kind": "FloatingIP",
            "metadata": { "name": "web", "namespace": "default" },
            "spec": { "floatingIPPool": 42 }
        });
        let body = review("floatingips", "FloatingIP", object).to_string();

        let answer = post_json(VALIDATE_FLOATING_IP_PATH, body).await;

        assert_eq!(answer["response"]["uid"], "b2a3c1d4");
        assert_eq!(answer["response"]["allowed"], false);
        assert!(answer.to_string().contains("internal server error"));
    }

    #[tokio::test]
    async fn test_pool_allowed() {
        let object = serde_json::to_value(pool(
            "P",
            "10.0.0.0/24",
            "10.0.0.10",
            "10.0.0.20",
            &["10.0.0.11"],
            &[],
            0,
        ))
        .unwrap();
        let body = review("floatingippools", "FloatingIPPool", object).to_string();

        let answer = post_json(VALIDATE_FLOATING_IP_POOL_PATH, body).await;

        assert_eq!(answer["response"]["uid"], "b2a3c1d4");
        assert_eq!(answer["response"]["allowed"], true);
    }

    #[tokio::test]
    async fn test_pool_denied() {
        let object = serde_json::to_value(pool(
            "P",
            "10.0.0.0/24",
            "10.0.0.30",
            "10.0.0.20",
            &[],
            &[],
            0,
        ))
        .unwrap();
        let body = review("floatingippools", "FloatingIPPool", object).to_string();

        let answer = post_json(VALIDATE_FLOATING_IP_POOL_PATH, body).await;

        assert_eq!(answer["response"]["allowed"], false);
        assert!(answer.to_string().contains(
            "start IP address 10.0.0.30 must be less than or equal to end IP address 10.0.0.20"
        ));
    }

    #[tokio::test]
    async fn test_garbage_body_gets_invalid_review() {
        let answer = post_json(VALIDATE_FLOATING_IP_POOL_PATH, "not json".to_string()).await;

        assert_eq!(answer["response"]["allowed"], false);
        assert!(answer.to_string().contains("cannot decode AdmissionReview"));
    }
}
