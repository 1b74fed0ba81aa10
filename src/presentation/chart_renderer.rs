// Chart renderer - four panel PNG with fitted curves and the overlay
use crate::application::curve_pipeline::{CurvePipeline, CurveReport};
use crate::domain::metric::{Metric, MetricCatalog, MetricProfile};
use crate::domain::milestone::{Milestone, MILESTONES};
use crate::domain::series::{ColumnKind, Series};
use crate::infrastructure::config::ChartSettings;
use crate::presentation::annotations;
use anyhow::Context;
use chrono::{Duration, Local, NaiveDate, NaiveDateTime};
use plotters::coord::types::{RangedCoordf64, RangedDate};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::ops::Range;
use std::path::PathBuf;

type DrawResult<T> = Result<T, Box<dyn std::error::Error>>;
type Panel<'a> = DrawingArea<BitMapBackend<'a>, Shift>;
type DateChart<'a, 'b> = ChartContext<'a, BitMapBackend<'b>, Cartesian2d<RangedDate<NaiveDate>, RangedCoordf64>>;

const FONT: &str = "sans-serif";
const MILESTONE_COLOR: RGBColor = RGBColor(31, 119, 180);
const METRIC_PANELS: usize = 3;
const OVERLAY_CEILING: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq)]
enum LineStyle {
    Solid,
    Dotted,
    Dashed,
}

#[derive(Debug, Clone)]
pub struct ChartRenderer {
    settings: ChartSettings,
    roll_days: usize,
    unstable_days: i64,
}

impl ChartRenderer {
    pub fn new(settings: ChartSettings, roll_days: usize, unstable_days: i64) -> Self {
        Self {
            settings,
            roll_days,
            unstable_days,
        }
    }

    /// Draws the report and returns the written path
    pub fn render(&self, report: &CurveReport, pipeline: &CurvePipeline) -> anyhow::Result<PathBuf> {
        let path = self.settings.output_path.clone();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory {}", parent.display()))?;
        }

        self.draw(report, pipeline, Local::now().naive_local())
            .map_err(|e| anyhow::anyhow!("Failed to render chart to {}: {}", path.display(), e))?;

        tracing::info!("Chart written to {}", path.display());
        Ok(path)
    }

    fn draw(&self, report: &CurveReport, pipeline: &CurvePipeline, generated_at: NaiveDateTime) -> DrawResult<()> {
        let size = (self.settings.width, self.settings.height);
        let root = BitMapBackend::new(&self.settings.output_path, size).into_drawing_area();
        root.fill(&WHITE)?;

        let (header, body) = root.split_vertically(140);
        let (title, subtitle) =
            annotations::chart_title(&self.settings.country, &self.settings.data_source, generated_at);
        let anchor = Pos::new(HPos::Center, VPos::Top);
        let title_style = TextStyle::from((FONT, 48).into_font()).pos(anchor);
        let subtitle_style = TextStyle::from((FONT, 28).into_font()).pos(anchor);
        let mid = self.settings.width as i32 / 2;
        header.draw_text(&title, &title_style, (mid, 20))?;
        header.draw_text(&subtitle, &subtitle_style, (mid, 80))?;

        let panels = body.split_evenly((2, 2));
        let catalog = pipeline.catalog();
        for (metric, slot) in panel_slots(catalog)? {
            let profile = catalog.profile(metric);
            let fit_start = pipeline.fit_start(profile);
            self.draw_metric_panel(&panels[slot], report, metric, profile, fit_start)?;
        }
        self.draw_overlay_panel(&panels[METRIC_PANELS], report, pipeline)?;

        root.present()?;
        Ok(())
    }

    fn draw_metric_panel(
        &self,
        panel: &Panel,
        report: &CurveReport,
        metric: Metric,
        profile: &MetricProfile,
        fit_start: NaiveDate,
    ) -> DrawResult<()> {
        let store = &report.store;
        let color = series_color(profile)?;
        let x_range = date_range(self.settings.plot_start, store.last_date() + Duration::days(1));

        let column_values = |kinds: &[ColumnKind]| -> Vec<f64> {
            kinds
                .iter()
                .filter_map(|kind| store.column(metric, *kind))
                .flat_map(|series| visible(series, &x_range))
                .map(|(_, v)| v)
                .collect()
        };
        let y_max = y_ceiling(
            column_values(&[ColumnKind::Raw, ColumnKind::Rolling]),
            column_values(&[ColumnKind::Fit]),
        );

        let mut chart = ChartBuilder::on(panel)
            .caption(&profile.title, (FONT, 32))
            .margin(20)
            .x_label_area_size(50)
            .y_label_area_size(80)
            .build_cartesian_2d(x_range.clone(), 0f64..y_max)?;

        chart
            .configure_mesh()
            .x_labels(12)
            .x_label_formatter(&|d| d.format("%b %d").to_string())
            .label_style((FONT, 16))
            .draw()?;

        if let Some(raw) = store.column(metric, ColumnKind::Raw) {
            let bar_style = color.mix(0.06).filled();
            chart
                .draw_series(
                    visible(raw, &x_range)
                        .into_iter()
                        .map(|(d, v)| Rectangle::new([(d, 0.0), (d + Duration::days(1), v)], bar_style)),
                )?
                .label(annotations::raw_label(&profile.label))
                .legend(move |(x, y)| Rectangle::new([(x, y - 6), (x + 20, y + 6)], bar_style));
        }

        let rolling_label = annotations::rolling_label(&profile.label, self.roll_days);
        let fit_label = report.fits.get(&metric).map(annotations::fit_label);
        let lines = [
            (ColumnKind::Stable, LineStyle::Solid, Some(rolling_label)),
            (ColumnKind::Unstable, LineStyle::Dotted, None),
            (ColumnKind::Fit, LineStyle::Dashed, fit_label),
        ];
        for (kind, style, label) in lines {
            if let Some(series) = store.column(metric, kind) {
                let series = bridged(store.column(metric, ColumnKind::Stable), series, kind);
                draw_line(&mut chart, &series, &x_range, y_max, color, style, label)?;
            }
        }

        draw_milestones(&mut chart, &x_range, y_max, profile.lag_days)?;

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.85))
            .border_style(BLACK)
            .label_font((FONT, 18))
            .draw()?;

        let mut note = annotations::metric_note(profile.lag_days, self.unstable_days, fit_start);
        note.extend(
            report
                .failures
                .iter()
                .filter(|f| f.metric == metric)
                .map(|f| format!("No {}: {}", f.stage, f.error)),
        );
        draw_note(panel, &note)
    }

    fn draw_overlay_panel(&self, panel: &Panel, report: &CurveReport, pipeline: &CurvePipeline) -> DrawResult<()> {
        let store = &report.store;
        let catalog = pipeline.catalog();
        let lead_lag = catalog.profile(Metric::PositiveTests).lag_days;
        let end = store.last_date() - Duration::days(lead_lag);
        let x_range = date_range(self.settings.overlay_start, end);

        let mut chart = ChartBuilder::on(panel)
            .caption("Curve Overlay", (FONT, 32))
            .margin(20)
            .x_label_area_size(50)
            .y_label_area_size(20)
            .build_cartesian_2d(x_range.clone(), 0f64..OVERLAY_CEILING)?;

        chart
            .configure_mesh()
            .x_labels(12)
            .x_label_formatter(&|d| d.format("%b %d").to_string())
            .y_label_formatter(&|_| String::new())
            .disable_y_mesh()
            .label_style((FONT, 16))
            .draw()?;

        for (metric, profile) in catalog.iter() {
            let color = series_color(profile)?;
            let label = annotations::overlay_label(&profile.label, profile.lag_days);
            if let Some(series) = store.column(metric, ColumnKind::OverlayStable) {
                draw_line(&mut chart, series, &x_range, OVERLAY_CEILING, color, LineStyle::Solid, Some(label))?;
            }
            if let Some(series) = store.column(metric, ColumnKind::OverlayUnstable) {
                let series = bridged(store.column(metric, ColumnKind::OverlayStable), series, ColumnKind::Unstable);
                draw_line(&mut chart, &series, &x_range, OVERLAY_CEILING, color, LineStyle::Dotted, None)?;
            }
        }

        draw_milestones(&mut chart, &x_range, OVERLAY_CEILING, 0)?;

        chart
            .configure_series_labels()
            .position(SeriesLabelPosition::UpperRight)
            .background_style(WHITE.mix(0.85))
            .border_style(BLACK)
            .label_font((FONT, 18))
            .draw()?;

        draw_note(panel, &annotations::overlay_note())
    }
}

fn series_color(profile: &MetricProfile) -> DrawResult<RGBColor> {
    let (r, g, b) = annotations::parse_hex_color(&profile.color)
        .ok_or_else(|| format!("invalid color {:?} for {}", profile.color, profile.label))?;
    Ok(RGBColor(r, g, b))
}

/// Zero based panel slot for each metric, one metric per panel
fn panel_slots(catalog: &MetricCatalog) -> Result<Vec<(Metric, usize)>, String> {
    let mut taken: [Option<Metric>; METRIC_PANELS] = [None; METRIC_PANELS];
    let mut slots = Vec::with_capacity(METRIC_PANELS);
    for (metric, profile) in catalog.iter() {
        let slot = profile
            .panel
            .checked_sub(1)
            .filter(|idx| *idx < METRIC_PANELS)
            .ok_or_else(|| {
                format!(
                    "{} is configured for panel {}, expected 1 to {}",
                    metric, profile.panel, METRIC_PANELS
                )
            })?;
        if let Some(other) = taken[slot].replace(metric) {
            return Err(format!("{} and {} are both configured for panel {}", other, metric, profile.panel));
        }
        slots.push((metric, slot));
    }
    Ok(slots)
}

/// Top of a metric panel's y axis. Observed values always fit; the fit curve
/// widens the axis only up to twice the observed peak.
fn y_ceiling(observed: impl IntoIterator<Item = f64>, fit: impl IntoIterator<Item = f64>) -> f64 {
    let base = observed.into_iter().filter(|v| v.is_finite()).fold(1.0, f64::max);
    let top = fit
        .into_iter()
        .filter(|v| v.is_finite() && *v <= 2.0 * base)
        .fold(base, f64::max);
    top * 1.05
}

/// Never empty, so the chart always has a usable x axis
fn date_range(start: NaiveDate, end: NaiveDate) -> Range<NaiveDate> {
    if end > start {
        start..end
    } else {
        start..start + Duration::days(1)
    }
}

fn visible(series: &Series, range: &Range<NaiveDate>) -> Vec<(NaiveDate, f64)> {
    series.defined().filter(|(d, _)| range.contains(d)).collect()
}

/// Runs of consecutive drawable points, so gaps and points off the top of
/// the chart are not bridged by a line
fn segments(series: &Series, range: &Range<NaiveDate>, ceiling: f64) -> Vec<Vec<(NaiveDate, f64)>> {
    let mut runs: Vec<Vec<(NaiveDate, f64)>> = Vec::new();
    let mut current = Vec::new();
    for point in series.points() {
        match point.value {
            Some(v) if v.is_finite() && v <= ceiling && range.contains(&point.date) => current.push((point.date, v)),
            _ => {
                if !current.is_empty() {
                    runs.push(std::mem::take(&mut current));
                }
            }
        }
    }
    if !current.is_empty() {
        runs.push(current);
    }
    runs
}

/// The unstable line starts at the last stable point so the two join up
fn bridged(stable: Option<&Series>, series: &Series, kind: ColumnKind) -> Series {
    let joint = stable.and_then(|s| s.points().iter().rev().find(|p| p.value.is_some()));
    match (kind, joint) {
        (ColumnKind::Unstable, Some(joint)) => {
            let mut points = vec![*joint];
            points.extend(series.points().iter().filter(|p| p.date > joint.date));
            Series::new(points)
        }
        _ => series.clone(),
    }
}

fn draw_line(
    chart: &mut DateChart,
    series: &Series,
    range: &Range<NaiveDate>,
    ceiling: f64,
    color: RGBColor,
    style: LineStyle,
    label: Option<String>,
) -> DrawResult<()> {
    let stroke = color.stroke_width(2);
    let mut labelled = label.is_none();

    for run in segments(series, range, ceiling) {
        let anno = match style {
            LineStyle::Solid => chart.draw_series(LineSeries::new(run, stroke))?,
            LineStyle::Dotted => chart.draw_series(DashedLineSeries::new(run, 3, 5, stroke))?,
            LineStyle::Dashed => chart.draw_series(DashedLineSeries::new(run, 12, 6, stroke))?,
        };
        if !labelled {
            if let Some(label) = &label {
                anno.label(label.clone())
                    .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], stroke));
            }
            labelled = true;
        }
    }
    Ok(())
}

fn draw_milestones(chart: &mut DateChart, range: &Range<NaiveDate>, y_max: f64, lag_days: i64) -> DrawResult<()> {
    let caption_font = (FONT, 15).into_font().transform(FontTransform::Rotate270);

    for milestone in MILESTONES.iter() {
        let date = milestone.shifted(lag_days);
        if !range.contains(&date) {
            continue;
        }
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(date, 0.0), (date, y_max)],
            milestone_style(milestone),
        )))?;
        chart.draw_series(std::iter::once(Text::new(
            milestone.label,
            (date, y_max * 0.03),
            caption_font.clone().color(&BLACK),
        )))?;
    }
    Ok(())
}

fn milestone_style(milestone: &Milestone) -> ShapeStyle {
    match milestone.group {
        Some(_) => MILESTONE_COLOR.mix(0.35).stroke_width(1),
        None => MILESTONE_COLOR.stroke_width(1),
    }
}

/// Boxed text in the upper left of a panel
fn draw_note(panel: &Panel, lines: &[String]) -> DrawResult<()> {
    let style = TextStyle::from((FONT, 18).into_font()).color(&BLACK);
    let (x, y) = (110, 70);
    let width = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as i32 * 9 + 20;
    let height = lines.len() as i32 * 24 + 12;

    panel.draw(&Rectangle::new([(x, y), (x + width, y + height)], WHITE.mix(0.85).filled()))?;
    panel.draw(&Rectangle::new([(x, y), (x + width, y + height)], BLACK.stroke_width(1)))?;
    for (i, line) in lines.iter().enumerate() {
        panel.draw_text(line, &style, (x + 10, y + 8 + i as i32 * 24))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::series::SeriesPoint;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2020, 4, d).unwrap()
    }

    #[test]
    fn test_segments_split_on_gaps_and_range() {
        let series = Series::from_daily(day(1), &[Some(1.0), Some(2.0), None, Some(4.0), Some(5.0), Some(6.0)]);
        let runs = segments(&series, &(day(1)..day(6)), 10.0);

        assert_eq!(runs, vec![vec![(day(1), 1.0), (day(2), 2.0)], vec![(day(4), 4.0), (day(5), 5.0)]]);
    }

    #[test]
    fn test_segments_stop_at_the_ceiling() {
        let series = Series::from_daily(day(1), &[Some(1.0), Some(8.0), Some(12.0), Some(f64::INFINITY), Some(3.0)]);
        let runs = segments(&series, &(day(1)..day(9)), 10.0);

        assert_eq!(runs, vec![vec![(day(1), 1.0), (day(2), 8.0)], vec![(day(5), 3.0)]]);
    }

    #[test]
    fn test_y_ceiling_ignores_runaway_fit() {
        let observed = [40.0, 100.0, 80.0];
        let runaway = [50.0, 150.0, 1e9, f64::INFINITY];

        assert_eq!(y_ceiling(observed, runaway), 150.0 * 1.05);
        assert_eq!(y_ceiling(observed, [f64::INFINITY]), 100.0 * 1.05);
        assert_eq!(y_ceiling([0.5], [f64::NAN]), 1.05);
    }

    #[test]
    fn test_panel_slots() {
        let catalog = MetricCatalog::new(
            MetricProfile::new("Positive", "Pos", "#0000ff", "pos", 7, 3),
            MetricProfile::new("ICU", "Icu", "#ff0000", "icu", 11, 1),
            MetricProfile::new("Deaths", "Died", "#000000", "died", 17, 2),
        );

        assert_eq!(
            panel_slots(&catalog).unwrap(),
            vec![(Metric::PositiveTests, 2), (Metric::IcuAdmissions, 0), (Metric::Deaths, 1)]
        );
    }

    #[test]
    fn test_shared_panel_is_rejected() {
        let catalog = MetricCatalog::new(
            MetricProfile::new("Positive", "Pos", "#0000ff", "pos", 7, 1),
            MetricProfile::new("ICU", "Icu", "#ff0000", "icu", 11, 1),
            MetricProfile::new("Deaths", "Died", "#000000", "died", 17, 2),
        );

        let err = panel_slots(&catalog).unwrap_err();
        assert_eq!(err, "pos and icu are both configured for panel 1");
    }

    #[test]
    fn test_out_of_range_panel_is_rejected() {
        let catalog = MetricCatalog::new(
            MetricProfile::new("Positive", "Pos", "#0000ff", "pos", 7, 4),
            MetricProfile::new("ICU", "Icu", "#ff0000", "icu", 11, 1),
            MetricProfile::new("Deaths", "Died", "#000000", "died", 17, 2),
        );

        assert!(panel_slots(&catalog).unwrap_err().contains("panel 4, expected 1 to 3"));
    }

    #[test]
    fn test_unstable_line_joins_stable_line() {
        let stable = Series::from_daily(day(1), &[Some(1.0), Some(2.0), None, None]);
        let unstable = Series::from_daily(day(1), &[None, None, Some(3.0), Some(4.0)]);
        let joined = bridged(Some(&stable), &unstable, ColumnKind::Unstable);

        assert_eq!(joined.points()[0], SeriesPoint::new(day(2), Some(2.0)));
        assert_eq!(joined.values(), vec![Some(2.0), Some(3.0), Some(4.0)]);
        assert_eq!(bridged(Some(&stable), &stable, ColumnKind::Stable), stable);
    }

    #[test]
    fn test_date_range_is_never_empty() {
        assert_eq!(date_range(day(5), day(2)), day(5)..day(6));
        assert_eq!(date_range(day(1), day(9)), day(1)..day(9));
    }

    #[test]
    fn test_invalid_color_is_reported() {
        let profile = MetricProfile::new("Deaths", "Died", "black", "died", 17, 2);
        assert!(series_color(&profile).is_err());
    }
}
