//! Terminal rendering of job progress.

use console::style;
use relstat_runner::{JobEvent, JobResult, JobStatus, OutputStream};

pub fn print_event(event: &JobEvent) {
    match event {
        JobEvent::JobStarted {
            pipeline,
            label,
            steps,
            ..
        } => {
            println!(
                "\n{} Running {} ({})",
                style("▶").cyan().bold(),
                style(label).bold(),
                pipeline
            );
            println!("  {} steps\n", steps);
        }
        JobEvent::StepStarted {
            index,
            total,
            label,
            description,
            ..
        } => {
            println!(
                "{} {}",
                style(format!("[{}/{}]", index + 1, total)).dim(),
                style(label).cyan().bold()
            );
            println!("  {}", style(description).dim());
        }
        JobEvent::Output { line, .. } => match line.stream {
            OutputStream::Stdout => println!("  │ {}", line.content),
            OutputStream::Stderr => println!("  │ {}", style(&line.content).yellow()),
        },
        JobEvent::StepFinished { name, report, .. } => {
            if report.success {
                println!(
                    "  {} {} ({})\n",
                    style("✓").green(),
                    name,
                    format_duration(report.duration_ms)
                );
            } else {
                println!(
                    "  {} {}: {}\n",
                    style("✗").red(),
                    name,
                    report.error.as_deref().unwrap_or("failed")
                );
            }
        }
    }
}

pub fn print_summary(result: &JobResult) {
    println!("{}", style("Summary").bold());
    for step in &result.steps {
        let mark = if step.success {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!("  {} {:<32} {:>8}", mark, step.name, format_duration(step.duration_ms));
    }

    let total = format_duration(result.duration_ms);
    match &result.status {
        JobStatus::Succeeded => {
            println!("\n{} Job succeeded in {}", style("✓").green().bold(), total)
        }
        JobStatus::Failed { step, .. } => println!(
            "\n{} Job failed at {} after {}",
            style("✗").red().bold(),
            style(step).bold(),
            total
        ),
        JobStatus::TimedOut { minutes } => println!(
            "\n{} Job timed out after {} minutes",
            style("✗").red().bold(),
            minutes
        ),
    }
}

pub fn format_duration(ms: u64) -> String {
    match ms {
        0..=999 => format!("{}ms", ms),
        1_000..=59_999 => format!("{:.1}s", ms as f64 / 1000.0),
        _ => format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000),
    }
}
