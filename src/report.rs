//! Console output for delivery runs.

use crate::delivery::{RunStatus, ShutdownOutcome};
use crate::pipeline::RunReport;

/// Prints a summary of a delivery run to the console.
pub fn print_summary(report: &RunReport) {
    let stats = &report.stats;

    println!();
    println!("Delivery Results:");
    println!("  Records:   {}", report.records);
    println!(
        "  Delivered: {}",
        console::style(stats.total - stats.failed).green()
    );
    if stats.first_pass_failed > 0 {
        println!("  Retried:   {}", console::style(stats.first_pass_failed).yellow());
        println!("  Recovered: {}", console::style(stats.recovered).yellow());
    }
    println!("  Failed:    {}", console::style(stats.failed).red());

    let status = match report.status {
        RunStatus::Success => console::style(report.status.as_str()).green(),
        RunStatus::Failure => console::style(report.status.as_str()).red(),
    };
    if report.completion_sent {
        println!("  Run status: {} (acknowledged)", status);
    } else {
        println!(
            "  Run status: {} {}",
            status,
            console::style("(not acknowledged)").red().bold()
        );
    }

    match report.shutdown {
        ShutdownOutcome::Drained => {}
        ShutdownOutcome::Expired { outstanding } => println!(
            "  {}",
            console::style(format!("{} uploads cancelled at shutdown", outstanding)).dim()
        ),
        ShutdownOutcome::Interrupted { outstanding } => println!(
            "  {}",
            console::style(format!("Interrupted, {} uploads cancelled", outstanding)).dim()
        ),
    }

    println!("  Duration: {:?}", report.duration);

    println!();
    if report.success() {
        println!(
            "{}",
            console::style("All test results reached remote storage.")
                .green()
                .bold()
        );
    } else if stats.failed > 0 {
        println!(
            "{}",
            console::style(format!(
                "{} case results failed to transmit.",
                stats.failed
            ))
            .red()
            .bold()
        );
    } else {
        println!(
            "{}",
            console::style("Remote storage did not acknowledge the run status.")
                .red()
                .bold()
        );
    }
}
