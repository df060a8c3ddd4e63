//! HTTP-level tests for coupon templates, issuance, and redemption

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::Router;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use buzz_core::coupon::{CouponIssue, CouponRepository};

    use crate::config::ApiConfig;
    use crate::middleware::auth::Role;
    use crate::routes;
    use crate::state::AppState;

    fn test_config() -> ApiConfig {
        ApiConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            qr_signing_key: "test-qr-signing-key".to_string(),
            payout_lead_days: 7,
            notify_webhook_url: None,
        }
    }

    fn setup() -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::in_memory(test_config()));
        (routes::router(state.clone()), state)
    }

    fn bearer(state: &AppState, user_id: Uuid, role: Role, business_id: Option<Uuid>) -> String {
        let token = state
            .auth
            .generate_token(user_id, role, business_id)
            .unwrap();
        format!("Bearer {}", token)
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn get(uri: &str, token: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .header("authorization", token)
            .body(Body::empty())
            .unwrap()
    }

    fn post(uri: &str, token: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("authorization", token)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn dec(value: &Value) -> Decimal {
        value.as_str().unwrap().parse().unwrap()
    }

    /// A 20%-off template valid for the next 30 days
    fn template_body() -> Value {
        json!({
            "name": "Launch offer",
            "discountType": "percentage",
            "discountValue": 20,
            "validFrom": (Utc::now() - Duration::days(1)).to_rfc3339(),
            "validUntil": (Utc::now() + Duration::days(30)).to_rfc3339(),
        })
    }

    async fn register_business(app: &Router, admin: &str) -> Uuid {
        let (status, body) = send(
            app.clone(),
            post(
                "/v1/admin/businesses",
                admin,
                json!({"name": "Cafe Dalgona", "category": "cafe"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["id"].as_str().unwrap().parse().unwrap()
    }

    async fn create_template(app: &Router, admin: &str, body: Value) -> Uuid {
        let (status, created) = send(
            app.clone(),
            post("/v1/admin/coupon-templates", admin, body),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        created["id"].as_str().unwrap().parse().unwrap()
    }

    async fn grant_coupon(
        app: &Router,
        admin: &str,
        user_id: Uuid,
        template_id: Uuid,
    ) -> (Uuid, String) {
        let (status, body) = send(
            app.clone(),
            post(
                "/v1/admin/coupons/grant",
                admin,
                json!({"userId": user_id, "templateId": template_id}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        (
            body["couponId"].as_str().unwrap().parse().unwrap(),
            body["qrCode"].as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn template_creation_requires_the_admin_role() {
        let (app, state) = setup();
        let user = bearer(&state, Uuid::new_v4(), Role::User, None);

        let (status, body) = send(
            app,
            post("/v1/admin/coupon-templates", &user, template_body()),
        )
        .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn template_validation_rejects_bad_input() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);

        let mut over_hundred = template_body();
        over_hundred["discountValue"] = json!(150);
        let (status, body) = send(
            app.clone(),
            post("/v1/admin/coupon-templates", &admin, over_hundred),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");

        let mut inverted_window = template_body();
        inverted_window["validFrom"] = json!((Utc::now() + Duration::days(30)).to_rfc3339());
        inverted_window["validUntil"] = json!((Utc::now() - Duration::days(1)).to_rfc3339());
        let (status, body) = send(
            app.clone(),
            post("/v1/admin/coupon-templates", &admin, inverted_window),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");

        let mut unknown_kind = template_body();
        unknown_kind["discountType"] = json!("bogus");
        let (status, body) = send(
            app,
            post("/v1/admin/coupon-templates", &admin, unknown_kind),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");
    }

    #[tokio::test]
    async fn percentage_discount_is_capped() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);
        let user_id = Uuid::new_v4();
        let user = bearer(&state, user_id, Role::User, None);
        let business_id = register_business(&app, &admin).await;

        let mut body = template_body();
        body["maxDiscountAmount"] = json!(1500);
        let template_id = create_template(&app, &admin, body).await;
        let (_, qr) = grant_coupon(&app, &admin, user_id, template_id).await;

        // 20% of 10000 is 2000, capped at 1500
        let (status, body) = send(
            app.clone(),
            post(
                "/v1/coupons/use",
                &user,
                json!({"qrCode": qr, "purchaseAmount": 10000, "businessId": business_id}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(dec(&body["discountAmount"]), Decimal::from(1500));
        assert_eq!(dec(&body["finalAmount"]), Decimal::from(8500));
        assert_eq!(body["couponName"], "Launch offer");
        assert_eq!(body["businessName"], "Cafe Dalgona");

        let (_, listed) = send(app, get("/v1/coupons?status=used", &user)).await;
        assert_eq!(listed["totalCount"], 1);
        let coupon = &listed["coupons"][0];
        assert_eq!(coupon["status"], "used");
        assert_eq!(dec(&coupon["usedAmount"]), Decimal::from(1500));
        assert_eq!(
            coupon["usedBusinessId"].as_str().unwrap(),
            business_id.to_string()
        );
    }

    #[tokio::test]
    async fn fixed_discount_cannot_exceed_the_purchase() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);
        let user_id = Uuid::new_v4();
        let user = bearer(&state, user_id, Role::User, None);
        let business_id = register_business(&app, &admin).await;

        let mut body = template_body();
        body["discountType"] = json!("fixed");
        body["discountValue"] = json!(5000);
        let template_id = create_template(&app, &admin, body).await;
        let (_, qr) = grant_coupon(&app, &admin, user_id, template_id).await;

        let (status, body) = send(
            app,
            post(
                "/v1/coupons/use",
                &user,
                json!({"qrCode": qr, "purchaseAmount": 3000, "businessId": business_id}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(dec(&body["discountAmount"]), Decimal::from(3000));
        assert_eq!(dec(&body["finalAmount"]), Decimal::ZERO);
    }

    #[tokio::test]
    async fn min_purchase_is_enforced_and_the_coupon_survives() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);
        let user_id = Uuid::new_v4();
        let user = bearer(&state, user_id, Role::User, None);
        let business_id = register_business(&app, &admin).await;

        let mut body = template_body();
        body["minPurchaseAmount"] = json!(10000);
        let template_id = create_template(&app, &admin, body).await;
        let (_, qr) = grant_coupon(&app, &admin, user_id, template_id).await;

        let (status, body) = send(
            app.clone(),
            post(
                "/v1/coupons/use",
                &user,
                json!({"qrCode": qr, "purchaseAmount": 5000, "businessId": business_id}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "MIN_PURCHASE_NOT_MET");

        // A zero purchase is plain validation
        let (status, body) = send(
            app.clone(),
            post(
                "/v1/coupons/use",
                &user,
                json!({"qrCode": qr, "purchaseAmount": 0, "businessId": business_id}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");

        // The failed attempts did not consume the coupon
        let (_, listed) = send(app, get("/v1/coupons?status=active", &user)).await;
        assert_eq!(listed["totalCount"], 1);
    }

    #[tokio::test]
    async fn a_coupon_redeems_exactly_once() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);
        let user_id = Uuid::new_v4();
        let user = bearer(&state, user_id, Role::User, None);
        let business_id = register_business(&app, &admin).await;

        let template_id = create_template(&app, &admin, template_body()).await;
        let (_, qr) = grant_coupon(&app, &admin, user_id, template_id).await;

        let attempt = json!({"qrCode": qr, "purchaseAmount": 10000, "businessId": business_id});
        let (status, _) = send(app.clone(), post("/v1/coupons/use", &user, attempt.clone())).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(app, post("/v1/coupons/use", &user, attempt)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "COUPON_NOT_ACTIVE");
    }

    #[tokio::test]
    async fn expired_coupons_lapse_persistently() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);
        let user_id = Uuid::new_v4();
        let user = bearer(&state, user_id, Role::User, None);
        let business_id = register_business(&app, &admin).await;
        let template_id = create_template(&app, &admin, template_body()).await;

        // Seeded directly so the coupon's own expiry predates today
        let coupon_id = Uuid::new_v4();
        let issue = CouponIssue {
            id: coupon_id,
            user_id,
            template_id,
            qr_code_data: state.qr.issue_coupon(&coupon_id).unwrap(),
            expires_at: Utc::now() - Duration::hours(1),
        };
        state.coupons.issue(&issue, Utc::now()).await.unwrap();

        let (status, body) = send(
            app.clone(),
            post(
                "/v1/coupons/use",
                &user,
                json!({
                    "qrCode": issue.qr_code_data,
                    "purchaseAmount": 10000,
                    "businessId": business_id,
                }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "COUPON_EXPIRED");

        // The lapse stuck even though the attempt failed
        let (_, listed) = send(app, get("/v1/coupons?status=expired", &user)).await;
        assert_eq!(listed["totalCount"], 1);
        assert_eq!(listed["coupons"][0]["status"], "expired");
    }

    #[tokio::test]
    async fn quantity_cap_blocks_the_last_redemption() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);
        let first_user = Uuid::new_v4();
        let second_user = Uuid::new_v4();
        let business_id = register_business(&app, &admin).await;

        let mut body = template_body();
        body["totalQuantity"] = json!(1);
        let template_id = create_template(&app, &admin, body).await;

        // Both issue while the redemption counter is still zero
        let (_, first_qr) = grant_coupon(&app, &admin, first_user, template_id).await;
        let (_, second_qr) = grant_coupon(&app, &admin, second_user, template_id).await;

        let first = bearer(&state, first_user, Role::User, None);
        let (status, _) = send(
            app.clone(),
            post(
                "/v1/coupons/use",
                &first,
                json!({"qrCode": first_qr, "purchaseAmount": 10000, "businessId": business_id}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let second = bearer(&state, second_user, Role::User, None);
        let (status, body) = send(
            app,
            post(
                "/v1/coupons/use",
                &second,
                json!({"qrCode": second_qr, "purchaseAmount": 10000, "businessId": business_id}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "QUANTITY_EXHAUSTED");
    }

    #[tokio::test]
    async fn scoped_templates_reject_other_businesses() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);
        let user_id = Uuid::new_v4();
        let user = bearer(&state, user_id, Role::User, None);
        let business_id = register_business(&app, &admin).await;

        let mut body = template_body();
        body["applicableBusinesses"] = json!([Uuid::new_v4()]);
        let template_id = create_template(&app, &admin, body).await;
        let (_, qr) = grant_coupon(&app, &admin, user_id, template_id).await;

        let (status, body) = send(
            app,
            post(
                "/v1/coupons/use",
                &user,
                json!({"qrCode": qr, "purchaseAmount": 10000, "businessId": business_id}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "COUPON_NOT_APPLICABLE");
    }

    #[tokio::test]
    async fn a_user_cannot_redeem_anothers_coupon() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);
        let owner = Uuid::new_v4();
        let business_id = register_business(&app, &admin).await;

        let template_id = create_template(&app, &admin, template_body()).await;
        let (_, qr) = grant_coupon(&app, &admin, owner, template_id).await;

        let other = bearer(&state, Uuid::new_v4(), Role::User, None);
        let (status, body) = send(
            app,
            post(
                "/v1/coupons/use",
                &other,
                json!({"qrCode": qr, "purchaseAmount": 10000, "businessId": business_id}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn listing_shows_template_names() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);
        let user_id = Uuid::new_v4();
        let user = bearer(&state, user_id, Role::User, None);

        let template_id = create_template(&app, &admin, template_body()).await;
        grant_coupon(&app, &admin, user_id, template_id).await;
        grant_coupon(&app, &admin, user_id, template_id).await;

        let (status, listed) = send(app.clone(), get("/v1/coupons", &user)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["totalCount"], 2);
        assert_eq!(listed["coupons"][0]["templateName"], "Launch offer");

        // Another user sees none of them
        let other = bearer(&state, Uuid::new_v4(), Role::User, None);
        let (_, empty) = send(app, get("/v1/coupons", &other)).await;
        assert_eq!(empty["totalCount"], 0);
    }

    #[tokio::test]
    async fn granting_needs_a_known_template() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);

        let (status, body) = send(
            app,
            post(
                "/v1/admin/coupons/grant",
                &admin,
                json!({"userId": Uuid::new_v4(), "templateId": Uuid::new_v4()}),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn template_listing_pages_through_the_catalog() {
        let (app, state) = setup();
        let admin = bearer(&state, Uuid::new_v4(), Role::Admin, None);

        for name in ["First", "Second", "Third"] {
            let mut body = template_body();
            body["name"] = json!(name);
            create_template(&app, &admin, body).await;
        }

        let (status, page) = send(
            app.clone(),
            get("/v1/admin/coupon-templates?page=1&limit=2", &admin),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(page["totalCount"], 3);
        assert_eq!(page["templates"].as_array().unwrap().len(), 2);

        let (_, rest) = send(
            app,
            get("/v1/admin/coupon-templates?page=2&limit=2", &admin),
        )
        .await;
        assert_eq!(rest["templates"].as_array().unwrap().len(), 1);
    }
}
