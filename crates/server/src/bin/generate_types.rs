//! Run with: cargo run --package server --bin generate-types --features typescript

use std::fs;
use std::path::Path;

fn main() {
    println!("Generating TypeScript types...");

    let out_dir = Path::new("frontend/src/types/generated");

    if let Err(e) = fs::create_dir_all(out_dir) {
        eprintln!("Failed to create output directory: {}", e);
        std::process::exit(1);
    }

    #[cfg(feature = "typescript")]
    {
        use ts_rs::TS;

        casegen_core::GenerationRequest::export_all_to(out_dir)
            .expect("Failed to export GenerationRequest");
        casegen_core::RequestStatus::export_all_to(out_dir)
            .expect("Failed to export RequestStatus");
        casegen_core::SubmitRequest::export_all_to(out_dir)
            .expect("Failed to export SubmitRequest");
        casegen_core::FeedbackRequest::export_all_to(out_dir)
            .expect("Failed to export FeedbackRequest");
        casegen_core::UploadSession::export_all_to(out_dir)
            .expect("Failed to export UploadSession");
        casegen_core::Artifact::export_all_to(out_dir).expect("Failed to export Artifact");
        casegen_core::SyncRecord::export_all_to(out_dir).expect("Failed to export SyncRecord");

        events::EventEnvelope::export_all_to(out_dir).expect("Failed to export EventEnvelope");
        events::Event::export_all_to(out_dir).expect("Failed to export Event");

        println!("TypeScript types generated in {}", out_dir.display());
    }

    #[cfg(not(feature = "typescript"))]
    {
        eprintln!("Enable the `typescript` feature to generate types.");
        std::process::exit(1);
    }
}
