//! Chart data and SVG rendering for the report images.
//!
//! Chart data is assembled from [`Aggregates`] first, then rendered, so the
//! shapes handed to the renderer can be tested without looking at SVG.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::analyzers::{Aggregates, BoxStats};

const WIDTH: f64 = 720.0;
const HEIGHT: f64 = 480.0;
const PALETTE: &[&str] = &[
    "#4c72b0", "#dd8452", "#55a868", "#c44e52", "#8172b3", "#937860", "#da8bc3", "#8c8c8c",
];

pub const GENDER_PIE: &str = "patient_gender_pie.svg";
pub const AGE_GROUP_PIE: &str = "age_group_pie.svg";
pub const TREND_LINE: &str = "admission_discharge_trend.svg";
pub const STAY_BOXPLOT: &str = "length_of_stay_boxplot.svg";

#[derive(Debug, Clone, PartialEq)]
pub struct PieChart {
    pub title: String,
    pub slices: Vec<(String, usize)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Circle,
    Cross,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineSeries {
    pub label: String,
    pub marker: Marker,
    /// (month, patients), ascending by month.
    pub points: Vec<(u32, usize)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LineChart {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub series: Vec<LineSeries>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoxPlot {
    pub title: String,
    pub x_label: String,
    pub y_label: String,
    pub groups: Vec<(String, BoxStats)>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Chart {
    Pie(PieChart),
    Line(LineChart),
    Box(BoxPlot),
}

pub fn gender_pie(aggregates: &Aggregates) -> PieChart {
    PieChart {
        title: "Patient Gender Distribution".to_string(),
        slices: by_count_desc(
            aggregates
                .gender_distribution
                .iter()
                .map(|(gender, count)| (gender.clone(), *count))
                .collect(),
        ),
    }
}

pub fn age_group_pie(aggregates: &Aggregates) -> PieChart {
    PieChart {
        title: "Age Group Distribution".to_string(),
        slices: by_count_desc(
            aggregates
                .age_group_distribution
                .iter()
                .map(|(group, count)| (group.label().to_string(), *count))
                .collect(),
        ),
    }
}

/// Largest slice first; equal counts keep their incoming order.
fn by_count_desc(mut slices: Vec<(String, usize)>) -> Vec<(String, usize)> {
    slices.sort_by(|a, b| b.1.cmp(&a.1));
    slices
}

pub fn trend_chart(aggregates: &Aggregates) -> LineChart {
    let series = |label: &str, marker, trend: &std::collections::BTreeMap<u32, usize>| {
        LineSeries {
            label: label.to_string(),
            marker,
            points: trend.iter().map(|(m, c)| (*m, *c)).collect(),
        }
    };

    LineChart {
        title: "Monthly Admissions and Discharges".to_string(),
        x_label: "Month".to_string(),
        y_label: "Number of Patients".to_string(),
        series: vec![
            series("Admissions", Marker::Circle, &aggregates.admission_trend),
            series("Discharges", Marker::Cross, &aggregates.discharge_trend),
        ],
    }
}

pub fn stay_boxplot(aggregates: &Aggregates) -> BoxPlot {
    BoxPlot {
        title: "Length of Stay by Condition".to_string(),
        x_label: "Condition".to_string(),
        y_label: "Length of Stay".to_string(),
        groups: aggregates
            .stay_distribution_by_condition
            .iter()
            .map(|(condition, stats)| (condition.clone(), stats.clone()))
            .collect(),
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn color(i: usize) -> &'static str {
    PALETTE[i % PALETTE.len()]
}

fn header(svg: &mut String, title: &str) {
    let _ = write!(
        svg,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{WIDTH}" height="{HEIGHT}" viewBox="0 0 {WIDTH} {HEIGHT}" font-family="sans-serif">"#
    );
    let _ = write!(
        svg,
        r#"<rect width="100%" height="100%" fill="white"/><text x="{:.1}" y="30" font-size="18" text-anchor="middle">{}</text>"#,
        WIDTH / 2.0,
        escape(title)
    );
}

fn no_data(svg: &mut String) {
    let _ = write!(
        svg,
        r##"<text x="{:.1}" y="{:.1}" font-size="14" text-anchor="middle" fill="#888">No data</text>"##,
        WIDTH / 2.0,
        HEIGHT / 2.0
    );
}

fn render_pie(svg: &mut String, chart: &PieChart) {
    let total: usize = chart.slices.iter().map(|(_, c)| c).sum();
    if total == 0 {
        no_data(svg);
        return;
    }

    let (cx, cy, r) = (260.0, 260.0, 170.0);
    let mut start = -std::f64::consts::FRAC_PI_2;

    for (i, (label, count)) in chart.slices.iter().enumerate() {
        let share = *count as f64 / total as f64;
        if *count == total {
            let _ = write!(
                svg,
                r#"<circle cx="{cx}" cy="{cy}" r="{r}" fill="{}"/>"#,
                color(i)
            );
        } else if *count > 0 {
            let end = start + share * std::f64::consts::TAU;
            let large = if share > 0.5 { 1 } else { 0 };
            let _ = write!(
                svg,
                r#"<path d="M{cx},{cy} L{:.2},{:.2} A{r},{r} 0 {large} 1 {:.2},{:.2} Z" fill="{}" stroke="white"/>"#,
                cx + r * start.cos(),
                cy + r * start.sin(),
                cx + r * end.cos(),
                cy + r * end.sin(),
                color(i)
            );
            start = end;
        }

        let y = 90.0 + i as f64 * 24.0;
        let _ = write!(
            svg,
            r#"<rect x="480" y="{:.1}" width="14" height="14" fill="{}"/><text x="502" y="{:.1}" font-size="13">{} ({:.1}%)</text>"#,
            y - 11.0,
            color(i),
            y,
            escape(label),
            share * 100.0
        );
    }
}

/// Plot area: left, top, right, bottom.
const PLOT: (f64, f64, f64, f64) = (80.0, 60.0, 690.0, 400.0);

fn axes(svg: &mut String, x_label: &str, y_label: &str, y_max: f64) {
    let (left, top, right, bottom) = PLOT;
    for step in 0..=5 {
        let value = y_max * step as f64 / 5.0;
        let y = bottom - (bottom - top) * step as f64 / 5.0;
        let _ = write!(
            svg,
            r##"<line x1="{left}" y1="{y:.1}" x2="{right}" y2="{y:.1}" stroke="#e5e5e5"/><text x="{:.1}" y="{:.1}" font-size="11" text-anchor="end">{value:.1}</text>"##,
            left - 6.0,
            y + 4.0
        );
    }
    let _ = write!(
        svg,
        r#"<line x1="{left}" y1="{bottom}" x2="{right}" y2="{bottom}" stroke="black"/><line x1="{left}" y1="{top}" x2="{left}" y2="{bottom}" stroke="black"/>"#
    );
    let _ = write!(
        svg,
        r#"<text x="{:.1}" y="{:.1}" font-size="13" text-anchor="middle">{}</text>"#,
        (left + right) / 2.0,
        HEIGHT - 12.0,
        escape(x_label)
    );
    let _ = write!(
        svg,
        r#"<text x="20" y="{:.1}" font-size="13" text-anchor="middle" transform="rotate(-90 20 {:.1})">{}</text>"#,
        (top + bottom) / 2.0,
        (top + bottom) / 2.0,
        escape(y_label)
    );
}

fn render_line(svg: &mut String, chart: &LineChart) {
    let y_max = chart
        .series
        .iter()
        .flat_map(|s| s.points.iter().map(|(_, c)| *c))
        .max()
        .unwrap_or(0);
    if y_max == 0 {
        no_data(svg);
        return;
    }

    let (left, top, right, bottom) = PLOT;
    let y_max = y_max as f64;
    axes(svg, &chart.x_label, &chart.y_label, y_max);

    let x_of = |month: u32| left + (right - left) * (month as f64 - 1.0) / 11.0;
    let y_of = |count: usize| bottom - (bottom - top) * count as f64 / y_max;

    for month in 1..=12 {
        let _ = write!(
            svg,
            r#"<text x="{:.1}" y="{:.1}" font-size="11" text-anchor="middle">{month}</text>"#,
            x_of(month),
            bottom + 18.0
        );
    }

    for (i, series) in chart.series.iter().enumerate() {
        let points: Vec<String> = series
            .points
            .iter()
            .map(|(m, c)| format!("{:.1},{:.1}", x_of(*m), y_of(*c)))
            .collect();
        let _ = write!(
            svg,
            r#"<polyline points="{}" fill="none" stroke="{}" stroke-width="2"/>"#,
            points.join(" "),
            color(i)
        );
        for (m, c) in &series.points {
            let (x, y) = (x_of(*m), y_of(*c));
            match series.marker {
                Marker::Circle => {
                    let _ = write!(
                        svg,
                        r#"<circle cx="{x:.1}" cy="{y:.1}" r="4" fill="{}"/>"#,
                        color(i)
                    );
                }
                Marker::Cross => {
                    let _ = write!(
                        svg,
                        r#"<path d="M{:.1},{:.1} L{:.1},{:.1} M{:.1},{:.1} L{:.1},{:.1}" stroke="{}" stroke-width="2"/>"#,
                        x - 4.0,
                        y - 4.0,
                        x + 4.0,
                        y + 4.0,
                        x - 4.0,
                        y + 4.0,
                        x + 4.0,
                        y - 4.0,
                        color(i)
                    );
                }
            }
        }

        let legend_y = top + 16.0 + i as f64 * 20.0;
        let _ = write!(
            svg,
            r#"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="{}" stroke-width="2"/><text x="{:.1}" y="{:.1}" font-size="12">{}</text>"#,
            right - 120.0,
            legend_y - 4.0,
            right - 96.0,
            legend_y - 4.0,
            color(i),
            right - 90.0,
            legend_y,
            escape(&series.label)
        );
    }
}

fn render_box(svg: &mut String, chart: &BoxPlot) {
    let y_max = chart
        .groups
        .iter()
        .map(|(_, stats)| stats.max)
        .fold(0.0_f64, f64::max);
    if chart.groups.is_empty() {
        no_data(svg);
        return;
    }

    let (left, top, right, bottom) = PLOT;
    let y_max = if y_max > 0.0 { y_max } else { 1.0 };
    axes(svg, &chart.x_label, &chart.y_label, y_max);

    let slot = (right - left) / chart.groups.len() as f64;
    let half = (slot * 0.3).min(30.0);
    let y_of = |value: f64| bottom - (bottom - top) * value / y_max;

    for (i, (label, stats)) in chart.groups.iter().enumerate() {
        let cx = left + slot * (i as f64 + 0.5);
        let _ = write!(
            svg,
            r#"<line x1="{cx:.1}" y1="{:.1}" x2="{cx:.1}" y2="{:.1}" stroke="black"/>"#,
            y_of(stats.lower_whisker),
            y_of(stats.upper_whisker)
        );
        let _ = write!(
            svg,
            r#"<rect x="{:.1}" y="{:.1}" width="{:.1}" height="{:.1}" fill="{}" stroke="black"/>"#,
            cx - half,
            y_of(stats.q3),
            half * 2.0,
            (y_of(stats.q1) - y_of(stats.q3)).max(1.0),
            color(i)
        );
        let _ = write!(
            svg,
            r#"<line x1="{:.1}" y1="{:.1}" x2="{:.1}" y2="{:.1}" stroke="black" stroke-width="2"/>"#,
            cx - half,
            y_of(stats.median),
            cx + half,
            y_of(stats.median)
        );
        for outlier in &stats.outliers {
            let _ = write!(
                svg,
                r#"<circle cx="{cx:.1}" cy="{:.1}" r="3" fill="none" stroke="black"/>"#,
                y_of(*outlier)
            );
        }
        let label_y = bottom + 14.0;
        let _ = write!(
            svg,
            r#"<text x="{cx:.1}" y="{label_y:.1}" font-size="11" text-anchor="end" transform="rotate(-45 {cx:.1} {label_y:.1})">{}</text>"#,
            escape(label)
        );
    }
}

/// Renders a chart to a standalone SVG document.
pub fn render_svg(chart: &Chart) -> String {
    let mut svg = String::new();
    let title = match chart {
        Chart::Pie(c) => &c.title,
        Chart::Line(c) => &c.title,
        Chart::Box(c) => &c.title,
    };
    header(&mut svg, title);

    match chart {
        Chart::Pie(c) => render_pie(&mut svg, c),
        Chart::Line(c) => render_line(&mut svg, c),
        Chart::Box(c) => render_box(&mut svg, c),
    }

    svg.push_str("</svg>\n");
    svg
}

/// Writes the four report charts into `dir` and returns their paths.
#[tracing::instrument(skip(aggregates), fields(dir = %dir.display()))]
pub fn write_charts(dir: &Path, aggregates: &Aggregates) -> Result<Vec<PathBuf>> {
    let charts = [
        (GENDER_PIE, Chart::Pie(gender_pie(aggregates))),
        (AGE_GROUP_PIE, Chart::Pie(age_group_pie(aggregates))),
        (TREND_LINE, Chart::Line(trend_chart(aggregates))),
        (STAY_BOXPLOT, Chart::Box(stay_boxplot(aggregates))),
    ];

    let mut written = Vec::with_capacity(charts.len());
    for (file_name, chart) in &charts {
        let path = dir.join(file_name);
        let svg = render_svg(chart);
        fs::write(&path, svg.as_bytes())
            .with_context(|| format!("failed to write chart {}", path.display()))?;
        debug!(path = %path.display(), bytes = svg.len(), "Chart written");
        written.push(path);
    }

    info!(charts = written.len(), "Charts rendered");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::AgeGroup;
    use std::collections::BTreeMap;

    fn aggregates() -> Aggregates {
        Aggregates {
            total_rows: 4,
            admission_trend: BTreeMap::from([(1, 3), (2, 1)]),
            discharge_trend: BTreeMap::from([(1, 2), (2, 2)]),
            avg_stay_by_condition: BTreeMap::new(),
            avg_stay_by_department: BTreeMap::new(),
            stay_stddev_by_condition: BTreeMap::new(),
            stay_distribution_by_condition: BTreeMap::from([(
                "Flu".to_string(),
                crate::analyzers::aggregate::box_stats(&[2.0, 4.0, 6.0]).unwrap(),
            )]),
            readmission_rate: 0.25,
            readmission_by_condition: BTreeMap::new(),
            outcome_segment: BTreeMap::new(),
            effectiveness_summary: BTreeMap::new(),
            gender_distribution: BTreeMap::from([("F".to_string(), 1), ("M".to_string(), 3)]),
            age_group_distribution: BTreeMap::from([
                (AgeGroup::Senior, 2),
                (AgeGroup::Child, 2),
            ]),
            interventions: BTreeMap::new(),
            high_risk_count: 0,
        }
    }

    #[test]
    fn test_pie_slices_are_value_counts() {
        let pie = gender_pie(&aggregates());
        assert_eq!(
            pie.slices,
            vec![("M".to_string(), 3), ("F".to_string(), 1)]
        );
    }

    #[test]
    fn test_age_group_pie_keeps_bucket_order_on_ties() {
        let pie = age_group_pie(&aggregates());
        assert_eq!(
            pie.slices,
            vec![("Child".to_string(), 2), ("Senior".to_string(), 2)]
        );
    }

    #[test]
    fn test_trend_chart_series_are_month_ordered() {
        let chart = trend_chart(&aggregates());

        assert_eq!(chart.series.len(), 2);
        assert_eq!(chart.series[0].label, "Admissions");
        assert_eq!(chart.series[0].points, vec![(1, 3), (2, 1)]);
        assert_eq!(chart.series[1].marker, Marker::Cross);
    }

    #[test]
    fn test_render_svg_is_well_formed() {
        for chart in [
            Chart::Pie(gender_pie(&aggregates())),
            Chart::Line(trend_chart(&aggregates())),
            Chart::Box(stay_boxplot(&aggregates())),
        ] {
            let svg = render_svg(&chart);
            assert!(svg.starts_with("<svg"));
            assert!(svg.trim_end().ends_with("</svg>"));
            assert!(!svg.contains("NaN"));
        }
    }

    #[test]
    fn test_render_empty_pie_says_no_data() {
        let svg = render_svg(&Chart::Pie(PieChart {
            title: "Empty".to_string(),
            slices: Vec::new(),
        }));
        assert!(svg.contains("No data"));
    }

    #[test]
    fn test_escape_labels() {
        let svg = render_svg(&Chart::Pie(PieChart {
            title: "A & B".to_string(),
            slices: vec![("<unknown>".to_string(), 1)],
        }));
        assert!(svg.contains("A &amp; B"));
        assert!(svg.contains("&lt;unknown&gt;"));
    }

    #[test]
    fn test_write_charts_creates_files() {
        let dir = std::env::temp_dir().join("hospital_analytics_test_charts");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let written = write_charts(&dir, &aggregates()).unwrap();

        assert_eq!(written.len(), 4);
        for path in &written {
            assert!(path.exists());
        }
        assert!(dir.join(STAY_BOXPLOT).exists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
