//! Text rendering of the dashboard views.

use std::io::{self, Write};

use client_core::{ControllerConfig, View};
use shared::{
    domain::{RiskLevel, Sentiment},
    protocol::{Comment, Report, SentimentDistribution, Topic},
};

const BAR_WIDTH: usize = 20;

pub fn render_view(out: &mut impl Write, view: &View<'_>, config: &ControllerConfig) -> io::Result<()> {
    match view {
        View::EmptyPrompt => {
            writeln!(out, "Get Started")?;
            writeln!(
                out,
                "Enter a product or company name to analyze customer sentiment and predict churn risk."
            )?;
            writeln!(out, "Examples: iPhone 17, Tesla Model 3, Netflix, Amazon Prime, Spotify")
        }
        View::InputForm { error } => {
            writeln!(out, "Error: {error}")?;
            writeln!(out, "Submit a product name again to retry.")
        }
        View::Progress { label, attempt, .. } => {
            if *attempt == 0 {
                writeln!(
                    out,
                    "{label} (this may take up to {} seconds...)",
                    config.polling_budget().as_secs()
                )
            } else {
                writeln!(out, "{label} [poll {attempt}/{}]", config.max_attempts)
            }
        }
        View::NoData { product } => {
            writeln!(out, "Analysis Overview - {product}")?;
            writeln!(out, "No analysis data available yet.")
        }
        View::Report(report) => render_report(out, report),
    }
}

pub fn render_report(out: &mut impl Write, report: &Report) -> io::Result<()> {
    let distribution = &report.sentiment_distribution;
    writeln!(out, "Analysis Overview - {}", report.product.name)?;
    if let Some(analysis) = &report.latest_analysis {
        writeln!(out, "  Total comments: {}", analysis.total_comments)?;
        writeln!(
            out,
            "  Positive: {} ({:.1}%)",
            analysis.positive_count, distribution.positive
        )?;
        writeln!(
            out,
            "  Negative: {} ({:.1}%)",
            analysis.negative_count, distribution.negative
        )?;
        writeln!(
            out,
            "  Neutral:  {} ({:.1}%)",
            analysis.neutral_count, distribution.neutral
        )?;

        let risk = report
            .effective_risk_level()
            .map(risk_label)
            .unwrap_or("Unknown");
        writeln!(out)?;
        writeln!(
            out,
            "Churn Risk Assessment: {risk} Risk (probability {:.1}%)",
            analysis.churn_risk_score.unwrap_or(0.0) * 100.0
        )?;
    }

    writeln!(out)?;
    writeln!(out, "Sentiment Distribution")?;
    render_distribution(out, distribution)?;

    if !report.topics.is_empty() {
        writeln!(out)?;
        writeln!(out, "Key Topics")?;
        for topic in &report.topics {
            render_topic(out, topic)?;
        }
    }

    writeln!(out)?;
    writeln!(out, "Recent Comments ({})", report.recent_comments.len())?;
    for comment in &report.recent_comments {
        render_comment(out, comment)?;
    }
    Ok(())
}

fn risk_label(level: RiskLevel) -> &'static str {
    match level {
        RiskLevel::Low => "Low",
        RiskLevel::Medium => "Medium",
        RiskLevel::High => "High",
    }
}

fn bar(percent: f64) -> String {
    let filled = ((percent.clamp(0.0, 100.0) / 100.0) * BAR_WIDTH as f64).round() as usize;
    format!("{}{}", "#".repeat(filled), ".".repeat(BAR_WIDTH - filled))
}

fn render_distribution(out: &mut impl Write, distribution: &SentimentDistribution) -> io::Result<()> {
    for (name, value) in [
        ("Positive", distribution.positive),
        ("Negative", distribution.negative),
        ("Neutral", distribution.neutral),
    ] {
        writeln!(out, "  {name:<9}{} {value:>5.1}%", bar(value))?;
    }
    Ok(())
}

fn render_topic(out: &mut impl Write, topic: &Topic) -> io::Result<()> {
    let sentiment = topic.avg_sentiment.unwrap_or(0.0);
    let mood = if sentiment > 0.0 { "+" } else { "-" };
    writeln!(
        out,
        "  {:<14}{:>4} mentions  {mood} {sentiment:.2}",
        topic.name, topic.mention_count
    )
}

fn render_comment(out: &mut impl Write, comment: &Comment) -> io::Result<()> {
    let sentiment = comment.sentiment.map(Sentiment::as_str).unwrap_or("unclassified");
    match &comment.author {
        Some(author) => writeln!(out, "  [{sentiment}] {} * {author}", comment.source)?,
        None => writeln!(out, "  [{sentiment}] {}", comment.source)?,
    }
    writeln!(out, "    {}", comment.text.trim())?;
    writeln!(
        out,
        "    Score: {:.2} | Confidence: {:.1}%",
        comment.sentiment_score.unwrap_or(0.0),
        comment.confidence.unwrap_or(0.0) * 100.0
    )
}
