//! End-to-end lifecycle tests for the document workflow engine, run over
//! the in-memory stores.

mod common;

use common::*;

use esign_engine::domain::{
    CallbackStatus, DelimiterType, DocumentStatus, RecipientStatus, SignatureType, TemplateStatus,
};
use esign_engine::infra::EngineError;
use esign_engine::workflow::{DelegateRequest, SubmitRequest};

fn submit_request() -> SubmitRequest {
    SubmitRequest {
        signature_image: "data:image/png;base64,iVBORw0KGgo=".to_string(),
        signature_kind: "drawn".to_string(),
        intent_confirmation: true,
        field_data: Default::default(),
    }
}

// ---------------------------------------------------------------------------
// Scenario A: single signer, no preview
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_signer_document_signs_in_one_step() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();

    assert_eq!(outcome.status, DocumentStatus::Distributed);
    assert_eq!(outcome.recipients.len(), 1);
    assert_eq!(outcome.recipients[0].status, RecipientStatus::Active);
    assert!(outcome.preview_url.is_none());

    // The one recipient holds a live token and got an invitation.
    let token = h.token_of(outcome.document_id, 1).await;
    assert_eq!(h.provider.sent_to("r1@example.com"), 1);

    let submitted = h
        .engine
        .submit_signature(&token, submit_request(), Some("203.0.113.9"), Some("test-ua"))
        .await
        .unwrap();

    assert_eq!(submitted.document_status, DocumentStatus::Signed);
    assert!(submitted.next_recipient.is_none());

    // The completion hook ran: PDF artifacts persisted, terminal state.
    let document = h.document(outcome.document_id).await;
    assert_eq!(document.status, DocumentStatus::Completed);
    assert!(document.pdf_url.is_some());
    assert!(document.pdf_hash.is_some());
    assert!(document.completed_at.is_some());
}

#[tokio::test]
async fn completion_failure_leaves_document_signed_and_retryable() {
    let h = TestHarness::new();
    h.pdf.set_failing(true);

    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;
    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();

    let token = h.token_of(outcome.document_id, 1).await;
    h.engine
        .submit_signature(&token, submit_request(), None, None)
        .await
        .unwrap();

    let document = h.document(outcome.document_id).await;
    assert_eq!(document.status, DocumentStatus::Signed);
    assert!(document.pdf_url.is_none());

    // Retry succeeds once the collaborator recovers.
    h.pdf.set_failing(false);
    h.engine.finalize_completion(outcome.document_id).await.unwrap();
    let document = h.document(outcome.document_id).await;
    assert_eq!(document.status, DocumentStatus::Completed);
}

// ---------------------------------------------------------------------------
// Scenario B: hierarchy advancement
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hierarchy_advances_through_recipients_in_order() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Hierarchy).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 2))
        .await
        .unwrap();

    let document = h.document(outcome.document_id).await;
    assert_eq!(document.recipients[0].status, RecipientStatus::Active);
    assert_eq!(document.recipients[1].status, RecipientStatus::Pending);
    // Only the active recipient is invited.
    assert_eq!(h.provider.sent_to("r1@example.com"), 1);
    assert_eq!(h.provider.sent_to("r2@example.com"), 0);

    let token_r1 = h.token_of(outcome.document_id, 1).await;
    let stale_token_r2 = h.token_of(outcome.document_id, 2).await;

    let submitted = h
        .engine
        .submit_signature(&token_r1, submit_request(), None, None)
        .await
        .unwrap();
    assert_eq!(submitted.document_status, DocumentStatus::PartiallySigned);
    assert_eq!(submitted.next_recipient.as_deref(), Some("r2@example.com"));

    // Recipient 2 was activated with a fresh token and notified.
    let document = h.document(outcome.document_id).await;
    assert_eq!(document.recipients[1].status, RecipientStatus::Active);
    let token_r2 = h.token_of(outcome.document_id, 2).await;
    assert_ne!(token_r2, stale_token_r2);
    assert_eq!(h.provider.sent_to("r2@example.com"), 1);

    let submitted = h
        .engine
        .submit_signature(&token_r2, submit_request(), None, None)
        .await
        .unwrap();
    assert_eq!(submitted.document_status, DocumentStatus::Signed);
}

#[tokio::test]
async fn hierarchy_rejects_out_of_turn_recipient() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Hierarchy).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 2))
        .await
        .unwrap();

    let token_r2 = h.token_of(outcome.document_id, 2).await;

    let err = h
        .engine
        .access_signing_page(&token_r2, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotYourTurn(_)));

    let err = h
        .engine
        .submit_signature(&token_r2, submit_request(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotYourTurn(_)));
}

// ---------------------------------------------------------------------------
// Multiple / send_to_all
// ---------------------------------------------------------------------------

#[tokio::test]
async fn multiple_signers_complete_in_any_order() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::SendToAll).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 3))
        .await
        .unwrap();

    // Everyone is active and invited at once.
    let document = h.document(outcome.document_id).await;
    assert!(document
        .recipients
        .iter()
        .all(|r| r.status == RecipientStatus::Active));
    for order in 1..=3 {
        assert_eq!(h.provider.sent_to(&format!("r{order}@example.com")), 1);
    }

    // Sign out of order: 3, 1, 2.
    for (order, expected) in [
        (3, DocumentStatus::PartiallySigned),
        (1, DocumentStatus::PartiallySigned),
        (2, DocumentStatus::Signed),
    ] {
        let token = h.token_of(outcome.document_id, order).await;
        let submitted = h
            .engine
            .submit_signature(&token, submit_request(), None, None)
            .await
            .unwrap();
        assert_eq!(submitted.document_status, expected);
    }
}

#[tokio::test]
async fn double_submission_is_rejected() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Multiple).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 2))
        .await
        .unwrap();

    let token = h.token_of(outcome.document_id, 1).await;
    h.engine
        .submit_signature(&token, submit_request(), None, None)
        .await
        .unwrap();

    // The document is only partially signed, so the link still resolves —
    // but a second submission is refused outright.
    let err = h
        .engine
        .submit_signature(&token, submit_request(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::AlreadySigned(_)));
}

// ---------------------------------------------------------------------------
// Field authorization
// ---------------------------------------------------------------------------

#[tokio::test]
async fn field_data_outside_own_assignment_is_rejected() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Multiple)
        .delimiter("buyer_note", DelimiterType::Text, false, 1)
        .delimiter("dealer_note", DelimiterType::Text, false, 2)
        .build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 2))
        .await
        .unwrap();

    let token_r1 = h.token_of(outcome.document_id, 1).await;
    let mut request = submit_request();
    request
        .field_data
        .insert("dealer_note".to_string(), "sneaky".to_string());

    let err = h
        .engine
        .submit_signature(&token_r1, request, None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::UnauthorizedField { ref key, .. } if key == "dealer_note"
    ));

    // Nothing was persisted: recipient unsigned, payload untouched.
    let document = h.document(outcome.document_id).await;
    assert_eq!(document.recipients[0].status, RecipientStatus::Active);
    assert!(document.payload.is_empty());

    // The recipient's own key is accepted.
    let mut request = submit_request();
    request
        .field_data
        .insert("buyer_note".to_string(), "all good".to_string());
    h.engine
        .submit_signature(&token_r1, request, None, None)
        .await
        .unwrap();

    let document = h.document(outcome.document_id).await;
    assert_eq!(
        document.payload.get("buyer_note").map(String::as_str),
        Some("all good")
    );
}

#[tokio::test]
async fn intent_confirmation_is_mandatory() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    let token = h.token_of(outcome.document_id, 1).await;

    let mut request = submit_request();
    request.intent_confirmation = false;
    let err = h
        .engine
        .submit_signature(&token, request, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ConsentRequired));
}

// ---------------------------------------------------------------------------
// Scenario C: decline
// ---------------------------------------------------------------------------

#[tokio::test]
async fn decline_resolves_document_and_kills_every_token() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Multiple).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 2))
        .await
        .unwrap();

    let token_r1 = h.token_of(outcome.document_id, 1).await;
    let token_r2 = h.token_of(outcome.document_id, 2).await;

    h.engine
        .decline(&token_r1, Some("price is wrong".to_string()))
        .await
        .unwrap();

    let document = h.document(outcome.document_id).await;
    assert_eq!(document.status, DocumentStatus::Rejected);
    assert_eq!(document.error_reason.as_deref(), Some("price is wrong"));
    assert!(document.recipients.iter().all(|r| r.token.is_none()));

    // Neither link can act anymore — including the other recipient's —
    // and both report the resolution, not a generic failure.
    for token in [&token_r1, &token_r2] {
        let err = h
            .engine
            .access_signing_page(token, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::DocumentRejected(_)));
    }
}

// ---------------------------------------------------------------------------
// Scenario D: OTP attempt limiting and lockout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn otp_lockout_rejects_even_the_correct_code() {
    let h = TestHarness::with_otp_config(esign_engine::otp::OtpConfig {
        digits: 6,
        max_attempts: 3,
        lockout: chrono::Duration::minutes(15),
    });
    let template = TemplateBuilder::new(h.company, SignatureType::Single)
        .mfa(true)
        .build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    let token = h.token_of(outcome.document_id, 1).await;

    h.engine.send_otp(&token).await.unwrap();
    let code = h.last_otp_code("r1@example.com");

    // Burn the attempts with wrong codes.
    let err = h.engine.verify_otp(&token, "000000").await.unwrap_err();
    assert!(matches!(err, EngineError::OtpInvalid { attempts_remaining: 2 }));
    let err = h.engine.verify_otp(&token, "000001").await.unwrap_err();
    assert!(matches!(err, EngineError::OtpInvalid { attempts_remaining: 1 }));
    let err = h.engine.verify_otp(&token, "000002").await.unwrap_err();
    assert!(matches!(err, EngineError::OtpLocked { .. }));

    // The correct code is rejected while locked.
    let err = h.engine.verify_otp(&token, &code).await.unwrap_err();
    assert!(matches!(err, EngineError::OtpLocked { .. }));
}

#[tokio::test]
async fn otp_verification_rotates_the_signing_token() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single)
        .mfa(true)
        .build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    let token = h.token_of(outcome.document_id, 1).await;

    // Submitting with the un-verified signing token is refused.
    let err = h
        .engine
        .submit_signature(&token, submit_request(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::OtpRequired));

    h.engine.send_otp(&token).await.unwrap();
    let code = h.last_otp_code("r1@example.com");
    let verified = h.engine.verify_otp(&token, &code).await.unwrap();

    // Old token is dead, the session token works.
    let err = h
        .engine
        .access_signing_page(&token, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidToken));

    let submitted = h
        .engine
        .submit_signature(&verified.token, submit_request(), None, None)
        .await
        .unwrap();
    assert_eq!(submitted.document_status, DocumentStatus::Signed);
}

#[tokio::test]
async fn otp_endpoints_refuse_when_mfa_disabled() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    let token = h.token_of(outcome.document_id, 1).await;

    let err = h.engine.send_otp(&token).await.unwrap_err();
    assert!(matches!(err, EngineError::OtpNotRequired));
    let err = h.engine.verify_otp(&token, "123456").await.unwrap_err();
    assert!(matches!(err, EngineError::OtpNotRequired));
}

// ---------------------------------------------------------------------------
// Access, evidence, scroll
// ---------------------------------------------------------------------------

#[tokio::test]
async fn access_promotes_to_opened_once_and_captures_evidence() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    let token = h.token_of(outcome.document_id, 1).await;

    let view = h
        .engine
        .access_signing_page(&token, Some("203.0.113.9"), Some("browser/1.0"))
        .await
        .unwrap();
    assert_eq!(view.status, DocumentStatus::Opened);
    assert_eq!(view.recipient.status, RecipientStatus::Opened);

    let document = h.document(outcome.document_id).await;
    assert_eq!(
        document.recipients[0].evidence.ip_address.as_deref(),
        Some("203.0.113.9")
    );
    assert_eq!(
        document.recipients[0].evidence.geo_location.as_deref(),
        Some("Testville, TS")
    );
    let version_after_first_open = document.version;

    // A second visit changes nothing.
    h.engine
        .access_signing_page(&token, Some("198.51.100.7"), None)
        .await
        .unwrap();
    let document = h.document(outcome.document_id).await;
    assert_eq!(document.version, version_after_first_open);
    assert_eq!(
        document.recipients[0].evidence.ip_address.as_deref(),
        Some("203.0.113.9")
    );
}

#[tokio::test]
async fn scroll_complete_is_idempotent() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    let token = h.token_of(outcome.document_id, 1).await;

    let first = h.engine.mark_scroll_complete(&token).await.unwrap();
    let second = h.engine.mark_scroll_complete(&token).await.unwrap();
    assert_eq!(first, second);

    let document = h.document(outcome.document_id).await;
    assert_eq!(document.recipients[0].scroll_completed_at, Some(first));
}

#[tokio::test]
async fn terminal_states_produce_distinct_access_errors() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;

    // Completed.
    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    let token = h.token_of(outcome.document_id, 1).await;
    h.engine
        .submit_signature(&token, submit_request(), None, None)
        .await
        .unwrap();
    let err = h
        .engine
        .access_signing_page(&token, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DocumentCompleted(_)));

    // Cancelled.
    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    let token = h.token_of(outcome.document_id, 1).await;
    h.engine
        .cancel(h.company, outcome.document_id, None)
        .await
        .unwrap();
    let err = h
        .engine
        .access_signing_page(&token, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DocumentCancelled(_)));

    // Rejected.
    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    let token = h.token_of(outcome.document_id, 1).await;
    h.engine.decline(&token, None).await.unwrap();
    let err = h
        .engine
        .access_signing_page(&token, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DocumentRejected(_)));
}

// ---------------------------------------------------------------------------
// Delegation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delegation_readdresses_the_slot_and_notifies_the_delegate() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Hierarchy).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 2))
        .await
        .unwrap();
    let token_r1 = h.token_of(outcome.document_id, 1).await;

    h.engine
        .delegate(
            &token_r1,
            DelegateRequest {
                delegate_email: "deputy@example.com".to_string(),
                delegate_name: "Deputy".to_string(),
                delegate_phone: None,
                reason: Some("on leave".to_string()),
            },
        )
        .await
        .unwrap();

    let document = h.document(outcome.document_id).await;
    let slot = &document.recipients[0];
    assert_eq!(slot.email, "deputy@example.com");
    assert_eq!(slot.signature_order, 1);
    assert_eq!(slot.delegated_from.as_deref(), Some("r1@example.com"));
    assert_eq!(slot.delegation_reason.as_deref(), Some("on leave"));
    assert_eq!(h.provider.sent_to("deputy@example.com"), 1);

    // Old token is dead; the delegate's token signs.
    let err = h
        .engine
        .access_signing_page(&token_r1, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidToken));

    let delegate_token = h.token_of(outcome.document_id, 1).await;
    let submitted = h
        .engine
        .submit_signature(&delegate_token, submit_request(), None, None)
        .await
        .unwrap();
    assert_eq!(submitted.document_status, DocumentStatus::PartiallySigned);
}

#[tokio::test]
async fn delegation_is_refused_after_signing() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Multiple).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 2))
        .await
        .unwrap();
    let token_r1 = h.token_of(outcome.document_id, 1).await;
    h.engine
        .submit_signature(&token_r1, submit_request(), None, None)
        .await
        .unwrap();

    let err = h
        .engine
        .delegate(
            &token_r1,
            DelegateRequest {
                delegate_email: "deputy@example.com".to_string(),
                delegate_name: "Deputy".to_string(),
                delegate_phone: None,
                reason: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DelegationNotAllowed(_)));
}

// ---------------------------------------------------------------------------
// Preview, admin operations
// ---------------------------------------------------------------------------

#[tokio::test]
async fn preview_documents_distribute_only_after_approval() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single)
        .preview(true)
        .build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    assert_eq!(outcome.status, DocumentStatus::DraftPreview);
    assert!(outcome.preview_url.is_some());
    // No signing invitations during preview.
    assert_eq!(h.provider.sent_to("r1@example.com"), 0);

    h.engine.approve(h.company, outcome.document_id).await.unwrap();

    let document = h.document(outcome.document_id).await;
    assert_eq!(document.status, DocumentStatus::Distributed);
    assert_eq!(document.recipients[0].status, RecipientStatus::Active);
    assert_eq!(h.provider.sent_to("r1@example.com"), 1);

    // Approve is preview-only.
    let err = h
        .engine
        .approve(h.company, outcome.document_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidStatusTransition { .. }));
}

#[tokio::test]
async fn preview_tokens_are_read_only() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single)
        .preview(true)
        .build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    let preview_token = outcome
        .preview_url
        .unwrap()
        .rsplit('/')
        .next()
        .unwrap()
        .to_string();

    // The preview renders without promoting anything.
    let view = h
        .engine
        .access_signing_page(&preview_token, None, None)
        .await
        .unwrap();
    assert_eq!(view.status, DocumentStatus::DraftPreview);

    // But it cannot sign.
    let err = h
        .engine
        .submit_signature(&preview_token, submit_request(), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidToken));
}

#[tokio::test]
async fn preview_rejection_cancels_the_document() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single)
        .preview(true)
        .build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();

    h.engine
        .reject_preview(h.company, outcome.document_id, Some("typo".to_string()))
        .await
        .unwrap();

    let document = h.document(outcome.document_id).await;
    assert_eq!(document.status, DocumentStatus::Cancelled);
    assert_eq!(document.error_reason.as_deref(), Some("typo"));
}

#[tokio::test]
async fn cancel_is_refused_once_completed() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    let token = h.token_of(outcome.document_id, 1).await;
    h.engine
        .submit_signature(&token, submit_request(), None, None)
        .await
        .unwrap();

    let document = h.document(outcome.document_id).await;
    assert_eq!(document.status, DocumentStatus::Completed);

    let err = h
        .engine
        .cancel(h.company, outcome.document_id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidStatusTransition { .. }));
}

#[tokio::test]
async fn resend_rotates_tokens_remind_reuses_them() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    let original_token = h.token_of(outcome.document_id, 1).await;

    h.engine.remind(h.company, outcome.document_id).await.unwrap();
    assert_eq!(h.token_of(outcome.document_id, 1).await, original_token);
    assert_eq!(h.provider.sent_to("r1@example.com"), 2); // invite + reminder

    h.engine.resend(h.company, outcome.document_id).await.unwrap();
    let rotated = h.token_of(outcome.document_id, 1).await;
    assert_ne!(rotated, original_token);

    // The superseded link is dead.
    let err = h
        .engine
        .access_signing_page(&original_token, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidToken));
}

#[tokio::test]
async fn cross_company_reads_are_not_found() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();

    let err = h
        .engine
        .document_status(other_company_id(), outcome.document_id)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DocumentNotFound(_)));
}

#[tokio::test]
async fn inactive_template_cannot_initiate() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single)
        .status(TemplateStatus::Archived)
        .build();
    h.insert_template(&template).await;

    let err = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::TemplateNotActive(_)));
}

#[tokio::test]
async fn missing_required_payload_field_fails_initiate() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single)
        .delimiter("vehicle", DelimiterType::Text, true, 1)
        .build();
    h.insert_template(&template).await;

    let err = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PayloadValidation(_)));
}

// ---------------------------------------------------------------------------
// Expiry sweep
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expiry_sweep_transitions_overdue_documents() {
    use esign_engine::infra::DocumentStore;

    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    let token = h.token_of(outcome.document_id, 1).await;

    // Push the deadline into the past.
    let mut document = h.document(outcome.document_id).await;
    document.expires_at = chrono::Utc::now() - chrono::Duration::hours(1);
    h.documents.update(&document).await.unwrap();

    let expired = h
        .engine
        .expire_documents(chrono::Utc::now(), 10)
        .await
        .unwrap();
    assert_eq!(expired, 1);

    let document = h.document(outcome.document_id).await;
    assert_eq!(document.status, DocumentStatus::Expired);
    assert!(document.recipients.iter().all(|r| r.token.is_none()));

    // A second sweep finds nothing.
    let expired = h
        .engine
        .expire_documents(chrono::Utc::now(), 10)
        .await
        .unwrap();
    assert_eq!(expired, 0);

    // The stale link reports the expiry distinctly.
    let err = h
        .engine
        .access_signing_page(&token, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::DocumentExpired(_)));
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completion_fires_the_webhook_callback() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;

    let mut request = initiate_request(template.id, 1);
    request.callback_url = Some("https://erp.example/webhooks/esign".to_string());
    let outcome = h.engine.initiate(h.company, request).await.unwrap();

    let token = h.token_of(outcome.document_id, 1).await;
    h.engine
        .submit_signature(&token, submit_request(), None, None)
        .await
        .unwrap();

    assert_eq!(h.callbacks.count(), 1);
    let (url, payload) = h.callbacks.delivered.lock().unwrap()[0].clone();
    assert_eq!(url, "https://erp.example/webhooks/esign");
    assert_eq!(payload["status"], "completed");

    let document = h.document(outcome.document_id).await;
    assert_eq!(document.callback_status, Some(CallbackStatus::Delivered));
}

#[tokio::test]
async fn failed_callbacks_stay_pending_for_the_worker() {
    let h = TestHarness::new();
    h.callbacks.fail.store(true, std::sync::atomic::Ordering::SeqCst);

    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;

    let mut request = initiate_request(template.id, 1);
    request.callback_url = Some("https://erp.example/webhooks/esign".to_string());
    let outcome = h.engine.initiate(h.company, request).await.unwrap();

    let token = h.token_of(outcome.document_id, 1).await;
    h.engine
        .submit_signature(&token, submit_request(), None, None)
        .await
        .unwrap();

    let document = h.document(outcome.document_id).await;
    assert_eq!(document.callback_status, Some(CallbackStatus::Failed));

    // The worker delivers once the receiver recovers.
    h.callbacks.fail.store(false, std::sync::atomic::Ordering::SeqCst);
    let mut document = h.document(outcome.document_id).await;
    document.callback_status = Some(CallbackStatus::Pending);
    {
        use esign_engine::infra::DocumentStore;
        h.documents.update(&document).await.unwrap();
    }

    let delivered = h.engine.deliver_pending_callbacks(10).await.unwrap();
    assert_eq!(delivered, 1);
    let document = h.document(outcome.document_id).await;
    assert_eq!(document.callback_status, Some(CallbackStatus::Delivered));
}

// ---------------------------------------------------------------------------
// Scenario E: bulk cancel with partial failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bulk_cancel_reports_independent_outcomes() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;

    let mut ids = Vec::new();
    for _ in 0..3 {
        let outcome = h
            .engine
            .initiate(h.company, initiate_request(template.id, 1))
            .await
            .unwrap();
        ids.push(outcome.document_id);
    }

    // Complete the middle one.
    let token = h.token_of(ids[1], 1).await;
    h.engine
        .submit_signature(&token, submit_request(), None, None)
        .await
        .unwrap();

    let outcome = h
        .engine
        .bulk_cancel(h.company, &ids, Some("deal fell through".to_string()))
        .await;

    assert_eq!(outcome.succeeded, 2);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].document_id, ids[1]);
    assert!(outcome.failed[0].reason.contains("completed"));

    // The two cancellations actually happened, tokens and all.
    for &id in [&ids[0], &ids[2]] {
        let document = h.document(id).await;
        assert_eq!(document.status, DocumentStatus::Cancelled);
        assert!(document.recipients.iter().all(|r| r.token.is_none()));
    }
}

#[tokio::test]
async fn bulk_initiate_processes_rows_independently() {
    use esign_engine::workflow::{start_bulk_initiate, BulkInitiateSpec, BulkJobStore, ColumnMapping};
    use std::sync::Arc;

    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single)
        .delimiter("vehicle", DelimiterType::Text, true, 1)
        .build();
    h.insert_template(&template).await;

    let jobs = Arc::new(BulkJobStore::new());
    let mut payload_mapping = std::collections::BTreeMap::new();
    payload_mapping.insert("vehicle".to_string(), "vehicle".to_string());

    let spec = BulkInitiateSpec {
        template_id: template.id,
        column_mapping: ColumnMapping {
            email: "email".to_string(),
            name: "name".to_string(),
            phone: None,
            payload: payload_mapping,
        },
        callback_url: None,
    };

    // Second row omits the required `vehicle` value and must fail alone.
    let csv = "email,name,vehicle\n\
               ada@example.com,Ada,Golf GTI\n\
               bob@example.com,Bob,\n"
        .to_string();

    let job_id = start_bulk_initiate(h.engine.clone(), jobs.clone(), h.company, spec, csv)
        .await
        .unwrap();

    let mut job = jobs.get(h.company, job_id).await.unwrap();
    for _ in 0..100 {
        if job.done {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        job = jobs.get(h.company, job_id).await.unwrap();
    }

    assert!(job.done);
    assert_eq!(job.total, 2);
    assert_eq!(job.succeeded, 1);
    assert_eq!(job.failed, 1);
    assert_eq!(job.errors[0].row, 2);

    // The successful row produced a live document and an invitation.
    assert_eq!(h.provider.sent_to("ada@example.com"), 1);
    assert_eq!(h.provider.sent_to("bob@example.com"), 0);
}

// ---------------------------------------------------------------------------
// Timeline and audit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn timeline_reflects_the_audit_trail() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single).build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();
    let token = h.token_of(outcome.document_id, 1).await;
    h.engine
        .access_signing_page(&token, None, None)
        .await
        .unwrap();
    h.engine
        .submit_signature(&token, submit_request(), None, None)
        .await
        .unwrap();

    let timeline = h
        .engine
        .timeline(h.company, outcome.document_id)
        .await
        .unwrap();

    let titles: Vec<&str> = timeline.iter().map(|t| t.title.as_str()).collect();
    assert!(titles.contains(&"Document created"));
    assert!(titles.contains(&"Signing links sent"));
    assert!(titles.contains(&"Signing page opened"));
    assert!(titles.contains(&"Signature submitted"));
    assert!(titles.contains(&"Document completed"));

    // Oldest first.
    assert_eq!(titles.first(), Some(&"Document created"));
}

// ---------------------------------------------------------------------------
// Short links
// ---------------------------------------------------------------------------

#[tokio::test]
async fn short_links_resolve_to_the_current_signing_url() {
    let h = TestHarness::new();
    let template = TemplateBuilder::new(h.company, SignatureType::Single)
        .short_links(true)
        .build();
    h.insert_template(&template).await;

    let outcome = h
        .engine
        .initiate(h.company, initiate_request(template.id, 1))
        .await
        .unwrap();

    let document = h.document(outcome.document_id).await;
    let code = document.recipients[0].short_code.clone().unwrap();
    let token = document.recipients[0].token.clone().unwrap();

    let url = h.engine.resolve_short_link(&code).await.unwrap();
    assert_eq!(url, format!("{TEST_BASE_URL}/sign/{token}"));

    // Resend rotates the token and re-points the code.
    h.engine.resend(h.company, outcome.document_id).await.unwrap();
    let rotated = h.token_of(outcome.document_id, 1).await;
    let url = h.engine.resolve_short_link(&code).await.unwrap();
    assert_eq!(url, format!("{TEST_BASE_URL}/sign/{rotated}"));

    let err = h.engine.resolve_short_link("nope1234").await.unwrap_err();
    assert!(matches!(err, EngineError::ShortLinkNotFound(_)));
}
