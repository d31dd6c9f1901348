//! Payment recording, balance checks, and reconciliation integration tests.

mod common;

use billing_service::models::{PaymentMethod, RecordPayment};
use chrono::{TimeZone, Utc};
use common::{cash_payment, create_invoice, create_sent_invoice, dec, seed_project, spawn_service};
use service_core::error::AppError;

#[tokio::test]
#[ignore]
async fn partial_payments_accumulate_until_paid() {
    let (service, ctx) = spawn_service().await;
    let project_id = seed_project(&service, &ctx).await;
    let invoice = create_sent_invoice(&service, &ctx, project_id, "5000.00", None).await;
    let id = invoice.invoice.invoice_id;

    let (_, view) = service
        .record_payment(&ctx, id, &cash_payment("2000.00"))
        .await
        .unwrap();
    assert_eq!(view.invoice.status, "partially_paid");
    assert_eq!(view.paid_amount, dec("2000.00"));
    assert_eq!(view.balance, dec("3000.00"));

    let (_, view) = service
        .record_payment(&ctx, id, &cash_payment("1500.00"))
        .await
        .unwrap();
    assert_eq!(view.invoice.status, "partially_paid");
    assert_eq!(view.balance, dec("1500.00"));

    let (_, view) = service
        .record_payment(&ctx, id, &cash_payment("1500.00"))
        .await
        .unwrap();
    assert_eq!(view.invoice.status, "paid");
    assert_eq!(view.balance, dec("0.00"));
    assert!(view.invoice.paid_at.is_some());

    // Invariant: paid_amount + balance always equals the invoice amount.
    assert_eq!(view.paid_amount + view.balance, view.invoice.amount);
}

#[tokio::test]
#[ignore]
async fn overpayment_is_rejected_with_remaining_balance() {
    let (service, ctx) = spawn_service().await;
    let project_id = seed_project(&service, &ctx).await;
    let invoice = create_sent_invoice(&service, &ctx, project_id, "5000.00", None).await;
    let id = invoice.invoice.invoice_id;

    service
        .record_payment(&ctx, id, &cash_payment("4000.00"))
        .await
        .unwrap();

    let err = service
        .record_payment(&ctx, id, &cash_payment("2000.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)), "{}", err);
    assert!(err.to_string().contains("exceeds remaining balance"), "{}", err);

    // The rejected payment left no trace.
    let view = service.get_invoice(&ctx, id).await.unwrap();
    assert_eq!(view.paid_amount, dec("4000.00"));
    assert_eq!(view.payment_count, 1);
}

#[tokio::test]
#[ignore]
async fn exact_remaining_balance_is_accepted() {
    let (service, ctx) = spawn_service().await;
    let project_id = seed_project(&service, &ctx).await;
    let invoice = create_sent_invoice(&service, &ctx, project_id, "100.00", None).await;
    let id = invoice.invoice.invoice_id;

    service
        .record_payment(&ctx, id, &cash_payment("60.00"))
        .await
        .unwrap();
    let (_, view) = service
        .record_payment(&ctx, id, &cash_payment("40.00"))
        .await
        .unwrap();
    assert_eq!(view.invoice.status, "paid");
    assert_eq!(view.balance, dec("0.00"));
}

#[tokio::test]
#[ignore]
async fn draft_invoice_rejects_payments() {
    let (service, ctx) = spawn_service().await;
    let project_id = seed_project(&service, &ctx).await;
    let draft = create_invoice(&service, &ctx, project_id, "100.00", None).await;

    let err = service
        .record_payment(&ctx, draft.invoice.invoice_id, &cash_payment("50.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)), "{}", err);
    assert!(
        err.to_string()
            .contains("Cannot record payment for draft invoice"),
        "{}",
        err
    );
}

#[tokio::test]
#[ignore]
async fn canceled_invoice_rejects_payments() {
    let (service, ctx) = spawn_service().await;
    let project_id = seed_project(&service, &ctx).await;
    let invoice = create_sent_invoice(&service, &ctx, project_id, "100.00", None).await;
    let id = invoice.invoice.invoice_id;

    service.cancel_invoice(&ctx, id).await.unwrap();

    let err = service
        .record_payment(&ctx, id, &cash_payment("50.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)), "{}", err);
    assert!(
        err.to_string()
            .contains("Cannot record payment for canceled invoice"),
        "{}",
        err
    );
}

#[tokio::test]
#[ignore]
async fn non_positive_payment_amount_is_rejected() {
    let (service, ctx) = spawn_service().await;
    let project_id = seed_project(&service, &ctx).await;
    let invoice = create_sent_invoice(&service, &ctx, project_id, "100.00", None).await;

    let err = service
        .record_payment(&ctx, invoice.invoice.invoice_id, &cash_payment("0"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)), "{}", err);
}

#[tokio::test]
#[ignore]
async fn backdated_payment_sets_historical_paid_at() {
    let (service, ctx) = spawn_service().await;
    let project_id = seed_project(&service, &ctx).await;
    let invoice = create_sent_invoice(&service, &ctx, project_id, "300.00", None).await;
    let id = invoice.invoice.invoice_id;

    let last_month = Utc.with_ymd_and_hms(2026, 7, 15, 10, 0, 0).unwrap();
    let (_, view) = service
        .record_payment(
            &ctx,
            id,
            &RecordPayment {
                amount: dec("300.00"),
                payment_method: PaymentMethod::BankTransfer,
                payment_date: Some(last_month),
                external_reference: Some("wire-4421".to_string()),
                notes: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(view.invoice.status, "paid");
    // paid_at reflects the payment date, not the wall clock at insert time.
    assert_eq!(view.invoice.paid_at, Some(last_month));
}

#[tokio::test]
#[ignore]
async fn deleting_a_payment_reverts_paid_to_partially_paid() {
    let (service, ctx) = spawn_service().await;
    let project_id = seed_project(&service, &ctx).await;
    let invoice = create_sent_invoice(&service, &ctx, project_id, "5000.00", None).await;
    let id = invoice.invoice.invoice_id;

    service
        .record_payment(&ctx, id, &cash_payment("2000.00"))
        .await
        .unwrap();
    let (final_payment, view) = service
        .record_payment(&ctx, id, &cash_payment("3000.00"))
        .await
        .unwrap();
    assert_eq!(view.invoice.status, "paid");

    let (_, view) = service
        .delete_payment(&ctx, final_payment.payment_id)
        .await
        .unwrap();
    assert_eq!(view.invoice.status, "partially_paid");
    assert_eq!(view.paid_amount, dec("2000.00"));
    assert_eq!(view.balance, dec("3000.00"));
    assert_eq!(view.invoice.paid_at, None);
}

#[tokio::test]
#[ignore]
async fn deleting_all_payments_reverts_to_sent() {
    let (service, ctx) = spawn_service().await;
    let project_id = seed_project(&service, &ctx).await;
    let invoice = create_sent_invoice(&service, &ctx, project_id, "1000.00", None).await;
    let id = invoice.invoice.invoice_id;

    let (payment, view) = service
        .record_payment(&ctx, id, &cash_payment("400.00"))
        .await
        .unwrap();
    assert_eq!(view.invoice.status, "partially_paid");

    let (_, view) = service.delete_payment(&ctx, payment.payment_id).await.unwrap();
    assert_eq!(view.invoice.status, "sent");
    assert_eq!(view.paid_amount, dec("0"));
    assert_eq!(view.payment_count, 0);
}

#[tokio::test]
#[ignore]
async fn out_of_order_deletion_reconciles_over_the_full_set() {
    let (service, ctx) = spawn_service().await;
    let project_id = seed_project(&service, &ctx).await;
    let invoice = create_sent_invoice(&service, &ctx, project_id, "900.00", None).await;
    let id = invoice.invoice.invoice_id;

    let (first, _) = service
        .record_payment(&ctx, id, &cash_payment("300.00"))
        .await
        .unwrap();
    service
        .record_payment(&ctx, id, &cash_payment("300.00"))
        .await
        .unwrap();
    service
        .record_payment(&ctx, id, &cash_payment("300.00"))
        .await
        .unwrap();

    // Delete the first payment, not the last.
    let (_, view) = service.delete_payment(&ctx, first.payment_id).await.unwrap();
    assert_eq!(view.invoice.status, "partially_paid");
    assert_eq!(view.paid_amount, dec("600.00"));
    assert_eq!(view.payment_count, 2);
}

#[tokio::test]
#[ignore]
async fn freed_balance_after_deletion_accepts_a_new_payment() {
    let (service, ctx) = spawn_service().await;
    let project_id = seed_project(&service, &ctx).await;
    let invoice = create_sent_invoice(&service, &ctx, project_id, "100.00", None).await;
    let id = invoice.invoice.invoice_id;

    let (payment, _) = service
        .record_payment(&ctx, id, &cash_payment("100.00"))
        .await
        .unwrap();

    // Paid in full, so any further payment is an overpayment.
    let err = service
        .record_payment(&ctx, id, &cash_payment("10.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)), "{}", err);

    service.delete_payment(&ctx, payment.payment_id).await.unwrap();

    let (_, view) = service
        .record_payment(&ctx, id, &cash_payment("10.00"))
        .await
        .unwrap();
    assert_eq!(view.invoice.status, "partially_paid");
    assert_eq!(view.balance, dec("90.00"));
}

#[tokio::test]
#[ignore]
async fn cross_tenant_payment_reads_as_not_found() {
    let (service, ctx_a) = spawn_service().await;
    let (_, ctx_b) = spawn_service().await;
    let project_a = seed_project(&service, &ctx_a).await;
    let invoice = create_sent_invoice(&service, &ctx_a, project_a, "100.00", None).await;

    let err = service
        .record_payment(&ctx_b, invoice.invoice.invoice_id, &cash_payment("50.00"))
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)), "{}", err);

    // A recorded payment is readable in its own tenant scope only.
    let (payment, _) = service
        .record_payment(&ctx_a, invoice.invoice.invoice_id, &cash_payment("50.00"))
        .await
        .unwrap();
    let found = service
        .database()
        .get_payment(ctx_a.tenant_id, payment.payment_id)
        .await
        .unwrap();
    assert!(found.is_some());
    let hidden = service
        .database()
        .get_payment(ctx_b.tenant_id, payment.payment_id)
        .await
        .unwrap();
    assert!(hidden.is_none());
}
