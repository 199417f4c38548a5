//! Example: classifying a vendor invoice with a scripted model.
//!
//! The first completion is cut off mid-object, so the classifier escalates
//! once; the second one arrives wrapped in prose and a code fence.
//!
//! Run with: `RUST_LOG=doc_classifier=debug cargo run --example classify_invoice`
//! Pass `--ollama` to use a local Ollama server instead of the mock.

use doc_classifier::generator::MockReply;
use doc_classifier::{
    Classifier, ClassificationRequest, Event, ExclusiveGenerator, FnEventHandler, Generator,
    InMemorySchemaCache, MockGenerator, OllamaGenerator, RequestContext, Stage, StageResult,
};
use serde_json::json;
use std::sync::Arc;

const INVOICE: &str = "\
INVOICE #INV-2024-0117
From: Acme Office Supplies Ltd
To: Northwind Consulting
Date: 2024-03-01
  20 x Printer paper (A4)   @ 4.50  =  90.00
   2 x Toner cartridge      @ 62.00 = 124.00
Subtotal 214.00  VAT 20% 42.80  Total 256.80 GBP";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let generator: Arc<dyn Generator> = if std::env::args().any(|a| a == "--ollama") {
        Arc::new(ExclusiveGenerator::new(OllamaGenerator::new(
            "http://localhost:11434",
            "mistral:7b-instruct",
        )))
    } else {
        Arc::new(MockGenerator::new(vec![
            MockReply::with_tokens(r#""business_relevant": true, "selected_action": "create_bi"#, 14),
            MockReply::text(concat!(
                "Here is the classification:\n```json\n",
                r#"{"business_relevant": true, "selected_action": "create_bill", "confidence": 91, "#,
                r#""reasoning": "Supplier invoice addressed to the business.", "#,
                r#""document_type": "invoice", "transaction_direction": "outgoing", "#,
                r#""primary_party": {"name": "Acme Office Supplies Ltd"}, "#,
                r#""suggested_actions": ["#,
                r#"{"action": "create_vendor", "entity": "Contact", "action_type": "PREREQUISITE", "confidence": 80}, "#,
                r#"{"action": "create_bill", "entity": "Bill", "action_type": "PRIMARY", "confidence": 91},]}"#,
                "\n```\nLet me know if you need anything else."
            )),
        ]))
    };

    let schemas = InMemorySchemaCache::new().with_schema(
        "zohobooks",
        "create_bill",
        json!({"type": "object", "required": ["vendor_id", "bill_number", "line_items"]}),
    );

    let classifier = Classifier::builder(generator)
        .schemas(Arc::new(schemas))
        .event_handler(Arc::new(FnEventHandler(|event: Event| {
            if let Event::Escalation { stage, trigger, .. } = event {
                println!("[{stage}] retrying with strict settings ({trigger})");
            }
        })))
        .build();

    let request = ClassificationRequest::new(
        Stage::ActionSelection,
        format!("Decide which accounting action this document requires.\n\n{INVOICE}"),
    )
    .with_context(RequestContext::new().insert("software", "zohobooks"));

    let StageResult::ActionSelection(result) = classifier.classify(&request).await? else {
        unreachable!("action-selection request");
    };

    let record = &result.record;
    println!("Selected action: {:?}", record.selected_action);
    println!("Confidence: {}", record.confidence);
    println!("Direction: {:?}", record.transaction_direction);
    if let Some(primary) = record.primary_action() {
        println!("Primary action: {}", primary.action);
    }
    println!("Corrections:");
    for fix in &result.corrections {
        println!("  - {}: {}", fix.field, fix.detail);
    }
    println!("Diagnostics: {}", serde_json::to_string_pretty(&result.diagnostics)?);

    Ok(())
}
