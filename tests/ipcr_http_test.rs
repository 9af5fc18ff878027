#[cfg(test)]
mod ipcr_http_tests {
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use ipcrserver::core::shared::test_utils::TestHarness;
    use ipcrserver::ipcr::handlers::{DIVISION_ID_HEADER, USER_ID_HEADER, USER_ROLE_HEADER};
    use ipcrserver::ipcr::Caller;
    use ipcrserver::main_module::build_router;

    const BOUNDARY: &str = "ipcr-test-boundary";

    fn app(harness: &TestHarness) -> Router {
        build_router(harness.state.clone())
    }

    fn request(method: Method, uri: &str, caller: &Caller) -> axum::http::request::Builder {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(USER_ID_HEADER, caller.user_id.to_string())
            .header(USER_ROLE_HEADER, caller.role.as_str());
        if let Some(division) = caller.division_id {
            builder = builder.header(DIVISION_ID_HEADER, division.to_string());
        }
        builder
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn multipart_file(file_name: &str, content_type: &str, data: &[u8]) -> Body {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        Body::from(body)
    }

    #[tokio::test]
    async fn test_health_reports_memory_backend() {
        let harness = TestHarness::new().await;
        let app = app(&harness);
        let (status, body) = send(
            &app,
            Request::builder().uri("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["backend"], "memory");
    }

    #[tokio::test]
    async fn test_missing_identity_is_401() {
        let harness = TestHarness::new().await;
        let app = app(&harness);
        let (status, body) = send(
            &app,
            Request::builder()
                .method(Method::POST)
                .uri("/api/ipcr/forms")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn test_form_workflow_over_http() {
        let harness = TestHarness::new().await;
        let app = app(&harness);
        let employee = harness.employee();

        let (status, body) = send(
            &app,
            request(Method::POST, "/api/ipcr/forms", &employee)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["success"], true);
        let form_id = body["data"]["formId"].as_str().unwrap().to_string();

        let (status, body) = send(
            &app,
            request(Method::POST, "/api/ipcr/forms", &employee)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["formId"], form_id.as_str());
        assert_eq!(body["data"]["created"], false);

        let indicator = json!({
            "category": "core",
            "description": "Process travel vouchers",
            "indicator": "Vouchers processed within 3 working days",
            "quantityScore": 5,
            "qualityScore": 5,
            "timelinessScore": 4
        });
        let (status, body) = send(
            &app,
            request(Method::POST, &format!("/api/ipcr/forms/{form_id}/indicators"), &employee)
                .header("content-type", "application/json")
                .body(Body::from(indicator.to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["averageScore"], 4.67);

        let (status, _) = send(
            &app,
            request(Method::POST, &format!("/api/ipcr/forms/{form_id}/submit"), &employee)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let chief = harness.division_chief();
        let (status, body) = send(
            &app,
            request(Method::POST, &format!("/api/ipcr/forms/{form_id}/endorse"), &chief)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "reviewed");

        let (status, body) = send(
            &app,
            request(Method::POST, &format!("/api/ipcr/forms/{form_id}/finalize"), &employee)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["success"], false);

        let hr = harness.hr_manager();
        let (status, body) = send(
            &app,
            request(Method::POST, &format!("/api/ipcr/forms/{form_id}/finalize"), &hr)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "finalized");
        assert_eq!(body["data"]["finalAverageRating"], 4.67);

        let (status, _) = send(
            &app,
            request(Method::POST, &format!("/api/ipcr/forms/{form_id}/finalize"), &hr)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_return_with_remarks_over_http() {
        let harness = TestHarness::new().await;
        let app = app(&harness);
        let employee = harness.employee();
        let form_id = harness.reviewed_form(&employee, &[(3, 4, 4)]).await;

        let chief = harness.division_chief();
        let (status, body) = send(
            &app,
            request(Method::POST, &format!("/api/ipcr/forms/{form_id}/return"), &chief)
                .header("content-type", "application/json")
                .body(Body::from(json!({ "remarks": "Attach the travel orders" }).to_string()))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "returned");
        assert_eq!(body["data"]["remarks"], "Attach the travel orders");
    }

    #[tokio::test]
    async fn test_unknown_form_is_404() {
        let harness = TestHarness::new().await;
        let app = app(&harness);
        let employee = harness.employee();
        let (status, _) = send(
            &app,
            request(Method::GET, &format!("/api/ipcr/forms/{}", Uuid::new_v4()), &employee)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_evidence_upload_and_delete_over_http() {
        let harness = TestHarness::new().await;
        let app = app(&harness);
        let employee = harness.employee();
        let form_id = harness.lifecycle.create_form(&employee).await.unwrap().form_id;

        let (status, body) = send(
            &app,
            request(Method::POST, &format!("/api/ipcr/forms/{form_id}/attachments"), &employee)
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(multipart_file("memo.pdf", "application/pdf", b"%PDF-1.4\n%%EOF"))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["fileType"], "application/pdf");
        let attachment_id = body["data"]["id"].as_str().unwrap().to_string();
        assert_eq!(harness.blobs.object_count().await, 1);

        let (status, body) = send(
            &app,
            request(Method::GET, &format!("/api/ipcr/attachments/{attachment_id}/url"), &employee)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["url"].as_str().unwrap().starts_with("memory://"));

        let (status, _) = send(
            &app,
            request(Method::DELETE, &format!("/api/ipcr/attachments/{attachment_id}"), &employee)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(harness.blobs.object_count().await, 0);
    }

    #[tokio::test]
    async fn test_oversized_upload_over_http_is_400() {
        let harness = TestHarness::new().await;
        let app = app(&harness);
        let employee = harness.employee();
        let form_id = harness.lifecycle.create_form(&employee).await.unwrap().form_id;

        let mut data = b"%PDF-1.4\n".to_vec();
        data.resize(11 * 1024 * 1024, b' ');
        let (status, body) = send(
            &app,
            request(Method::POST, &format!("/api/ipcr/forms/{form_id}/attachments"), &employee)
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(multipart_file("scan.pdf", "application/pdf", &data))
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(harness.blobs.object_count().await, 0);
    }

    fn assert_failure_envelope(status: StatusCode, body: &Value, expected: StatusCode) {
        assert_eq!(status, expected, "{body}");
        assert_eq!(body["success"], false);
        assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()), "{body}");
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn test_malformed_json_body_gets_envelope() {
        let harness = TestHarness::new().await;
        let app = app(&harness);
        let employee = harness.employee();
        let form_id = harness.lifecycle.create_form(&employee).await.unwrap().form_id;

        let (status, body) = send(
            &app,
            request(Method::POST, &format!("/api/ipcr/forms/{form_id}/indicators"), &employee)
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await;
        assert_failure_envelope(status, &body, StatusCode::BAD_REQUEST);

        let wrong_type = json!({
            "category": "core",
            "description": "Process travel vouchers",
            "indicator": "Vouchers processed within 3 working days",
            "quantityScore": "x"
        });
        let (status, body) = send(
            &app,
            request(Method::POST, &format!("/api/ipcr/forms/{form_id}/indicators"), &employee)
                .header("content-type", "application/json")
                .body(Body::from(wrong_type.to_string()))
                .unwrap(),
        )
        .await;
        assert_failure_envelope(status, &body, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            request(Method::PUT, &format!("/api/ipcr/indicators/{}", Uuid::new_v4()), &employee)
                .body(Body::from(json!({ "qualityScore": 3 }).to_string()))
                .unwrap(),
        )
        .await;
        assert_failure_envelope(status, &body, StatusCode::BAD_REQUEST);

        let detail = harness.lifecycle.get_form(&employee, form_id).await.unwrap();
        assert!(detail.indicators.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_return_remarks_are_rejected() {
        let harness = TestHarness::new().await;
        let app = app(&harness);
        let employee = harness.employee();
        let form_id = harness.reviewed_form(&employee, &[(3, 4, 4)]).await;
        let chief = harness.division_chief();

        let (status, body) = send(
            &app,
            request(Method::POST, &format!("/api/ipcr/forms/{form_id}/return"), &chief)
                .header("content-type", "application/json")
                .body(Body::from("{\"remarks\": "))
                .unwrap(),
        )
        .await;
        assert_failure_envelope(status, &body, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            request(Method::POST, &format!("/api/ipcr/forms/{form_id}/return"), &chief)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["status"], "returned");
    }

    #[tokio::test]
    async fn test_bad_path_and_query_get_envelope() {
        let harness = TestHarness::new().await;
        let app = app(&harness);
        let employee = harness.employee();

        let (status, body) = send(
            &app,
            request(Method::GET, "/api/ipcr/forms/not-a-uuid", &employee)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_failure_envelope(status, &body, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            request(Method::DELETE, "/api/ipcr/attachments/42", &employee)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_failure_envelope(status, &body, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            request(Method::GET, "/api/ipcr/forms?status=archived", &employee)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_failure_envelope(status, &body, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_multipart_gets_envelope() {
        let harness = TestHarness::new().await;
        let app = app(&harness);
        let employee = harness.employee();
        let form_id = harness.lifecycle.create_form(&employee).await.unwrap().form_id;
        let uri = format!("/api/ipcr/forms/{form_id}/attachments");

        // Boundary declared but never present in the body.
        let (status, body) = send(
            &app,
            request(Method::POST, &uri, &employee)
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from("this is not a multipart payload"))
                .unwrap(),
        )
        .await;
        assert_failure_envelope(status, &body, StatusCode::BAD_REQUEST);

        // No boundary parameter at all.
        let (status, body) = send(
            &app,
            request(Method::POST, &uri, &employee)
                .header("content-type", "multipart/form-data")
                .body(multipart_file("memo.pdf", "application/pdf", b"%PDF-1.4\n%%EOF"))
                .unwrap(),
        )
        .await;
        assert_failure_envelope(status, &body, StatusCode::BAD_REQUEST);

        // Truncated before the closing boundary.
        let truncated = format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"memo.pdf\"\r\n\r\n%PDF-1.4\n"
        );
        let (status, body) = send(
            &app,
            request(Method::POST, &uri, &employee)
                .header(
                    "content-type",
                    format!("multipart/form-data; boundary={BOUNDARY}"),
                )
                .body(Body::from(truncated))
                .unwrap(),
        )
        .await;
        assert_failure_envelope(status, &body, StatusCode::BAD_REQUEST);

        assert_eq!(harness.blobs.object_count().await, 0);
    }
}
