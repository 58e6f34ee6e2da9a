//! ECharts configurations for the defect analytics panel.
//!
//! Two charts are derived from the aggregation rows:
//! - **Defect rate**: processed quantity bars plus a defect-rate line on a
//!   secondary 0-100 axis
//! - **Defect breakdown**: one bar series per configured counter
//!
//! Charts are serialized to JSON options and initialised client-side with a
//! resize listener, so they re-flow with their container.

use charming::{
    Chart,
    component::{Axis, Grid, Legend, Title},
    element::{AxisPointer, AxisPointerType, AxisType, Tooltip, Trigger},
    series::{Line, bar::Bar},
};
use maud::{Markup, PreEscaped, Render, html};

use crate::dashboard::models::AggregationRow;
use crate::theme::{ClassList, Enhance};

pub const DEFECT_RATE_CHART_ID: &str = "defect-rate-chart";
pub const COUNTER_CHART_ID: &str = "defect-counter-chart";

const PANEL_CLASSES: &str = "chart-panel bg-white border-gray-200";

fn labels(rows: &[AggregationRow]) -> Vec<String> {
    rows.iter().map(|r| r.key.clone()).collect()
}

fn axis_tooltip() -> Tooltip {
    Tooltip::new()
        .trigger(Trigger::Axis)
        .axis_pointer(AxisPointer::new().type_(AxisPointerType::Shadow))
}

fn grid() -> Grid {
    Grid::new()
        .left("3%")
        .right("4%")
        .bottom("3%")
        .top(70)
        .contain_label(true)
}

/// Quantity bars with the defect rate as a line on a 0-100 secondary axis.
/// `None` when there are no rows.
pub fn defect_rate_chart(rows: &[AggregationRow]) -> Option<Chart> {
    if rows.is_empty() {
        tracing::warn!(chart = DEFECT_RATE_CHART_ID, "no aggregation rows; skipping chart");
        return None;
    }
    let quantities: Vec<f64> = rows.iter().map(|r| r.total_quantity).collect();
    let rates: Vec<f64> = rows.iter().map(|r| r.defect_rate).collect();

    Some(
        Chart::new()
            .title(Title::new().text("Defect rate").subtext("Processed quantity and defect %"))
            .tooltip(axis_tooltip())
            .legend(Legend::new().top(30))
            .grid(grid())
            .x_axis(Axis::new().type_(AxisType::Category).data(labels(rows)))
            .y_axis(Axis::new().type_(AxisType::Value).name("Quantity"))
            .y_axis(
                Axis::new()
                    .type_(AxisType::Value)
                    .name("Defect rate (%)")
                    .min(0)
                    .max(100),
            )
            .series(Bar::new().name("Processed quantity").data(quantities))
            .series(Line::new().name("Defect rate").y_axis_index(1).data(rates)),
    )
}

/// One bar series per counter; counters missing from a row read as zero.
/// `None` when there are no rows.
pub fn counter_chart(rows: &[AggregationRow], counters: &[String]) -> Option<Chart> {
    if rows.is_empty() {
        tracing::warn!(chart = COUNTER_CHART_ID, "no aggregation rows; skipping chart");
        return None;
    }

    let mut chart = Chart::new()
        .title(Title::new().text("Defect breakdown"))
        .tooltip(axis_tooltip())
        .legend(Legend::new().top(30))
        .grid(grid())
        .x_axis(Axis::new().type_(AxisType::Category).data(labels(rows)))
        .y_axis(Axis::new().type_(AxisType::Value));

    for counter in counters {
        let data: Vec<f64> = rows.iter().map(|r| r.counter(counter)).collect();
        chart = chart.series(Bar::new().name(counter.as_str()).data(data));
    }
    Some(chart)
}

/// A chart with the container it is drawn into.
#[derive(Debug, Clone)]
pub struct ChartPanel {
    pub id: &'static str,
    pub title: &'static str,
    /// ECharts options as JSON.
    pub options: String,
    pub classes: ClassList,
}

impl ChartPanel {
    pub fn new(id: &'static str, title: &'static str, chart: &Chart) -> Self {
        Self {
            id,
            title,
            options: chart.to_string(),
            classes: ClassList::parse(PANEL_CLASSES),
        }
    }
}

/// The analytics panel: chart containers plus their init script, or an
/// empty placeholder when there was nothing to draw.
#[derive(Debug, Clone)]
pub struct ChartSection {
    pub panels: Vec<ChartPanel>,
    pub classes: ClassList,
}

impl ChartSection {
    pub fn from_rows(rows: &[AggregationRow], counters: &[String]) -> Self {
        let mut panels = Vec::new();
        if let Some(chart) = defect_rate_chart(rows) {
            panels.push(ChartPanel::new(DEFECT_RATE_CHART_ID, "Defect rate", &chart));
        }
        if let Some(chart) = counter_chart(rows, counters) {
            panels.push(ChartPanel::new(COUNTER_CHART_ID, "Defect breakdown", &chart));
        }
        Self {
            panels,
            classes: ClassList::parse("chart-section text-gray-900"),
        }
    }
}

/// Embed JSON inside a `<script>` element. Markup-significant characters
/// and JS line terminators only occur inside JSON strings, where the `\u`
/// escapes decode to the same text.
fn script_safe(json: &str) -> String {
    let mut out = String::with_capacity(json.len());
    for ch in json.chars() {
        match ch {
            '<' => out.push_str("\\u003c"),
            '>' => out.push_str("\\u003e"),
            '&' => out.push_str("\\u0026"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            _ => out.push(ch),
        }
    }
    out
}

/// Initialise every panel and re-flow it on window resize.
pub fn charts_script(panels: &[ChartPanel]) -> Markup {
    let body = panels
        .iter()
        .map(|panel| {
            format!(
                r#"(function() {{
    const dom = document.getElementById("{}");
    if (!dom || typeof echarts === "undefined") {{ return; }}
    const chart = echarts.getInstanceByDom(dom) || echarts.init(dom);
    chart.setOption({});
    window.addEventListener("resize", function() {{ chart.resize(); }});
}})();"#,
                panel.id,
                script_safe(&panel.options)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    html! {
        script { (PreEscaped(body)) }
    }
}

impl Render for ChartSection {
    fn render(&self) -> Markup {
        html! {
            section id="analytics-charts" class=(self.classes.to_string()) {
                @if self.panels.is_empty() {
                    div class="table-state bg-white text-gray-600" data-state="empty" role="status" {
                        p class="table-state__title" { "No analytics data" }
                        p class="table-state__message" { "Nothing matched the selected filters." }
                    }
                } @else {
                    div class="chart-grid" {
                        @for panel in &self.panels {
                            div class=(panel.classes.to_string()) {
                                h3 class="chart-panel__title" { (panel.title) }
                                div id=(panel.id) class="chart-panel__canvas" {}
                            }
                        }
                    }
                    (charts_script(&self.panels))
                }
            }
        }
    }
}

impl Enhance for ChartSection {
    fn visit_classes(&mut self, visit: &mut dyn FnMut(&mut ClassList)) {
        visit(&mut self.classes);
        for panel in &mut self.panels {
            visit(&mut panel.classes);
        }
    }
}
