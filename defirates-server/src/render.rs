//! HTML rendering for the rates page, table partial and re-sync rows
//!
//! Markup is produced with plain string building; every value that comes
//! from the store or the request passes through [`escape_html`].

use chrono::{DateTime, Utc};
use defirates_common::db::{FilterSpec, SortField, SortOrder, YieldRecord};
use std::fmt::Write;

/// Values needed to render the full page
#[derive(Debug)]
pub struct PageContext<'a> {
    pub records: &'a [YieldRecord],
    pub filter: &'a FilterSpec,
    pub assets: &'a [String],
    pub chains: &'a [String],
    pub protocols: &'a [String],
    pub categories: &'a [String],
    pub last_refresh: Option<DateTime<Utc>>,
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// CSS class for an APY cell
pub fn apy_class(apy: f64) -> &'static str {
    if apy >= 10.0 {
        "apy-high"
    } else if apy >= 5.0 {
        "apy-medium"
    } else {
        "apy-low"
    }
}

/// `$1.23B`, `$4.56M`, `$7.89K` or `$12.34`
pub fn format_tvl(tvl: f64) -> String {
    if tvl >= 1e9 {
        format!("${:.2}B", tvl / 1e9)
    } else if tvl >= 1e6 {
        format!("${:.2}M", tvl / 1e6)
    } else if tvl >= 1e3 {
        format!("${:.2}K", tvl / 1e3)
    } else {
        format!("${:.2}", tvl)
    }
}

pub fn format_maturity(maturity: Option<&DateTime<Utc>>) -> String {
    match maturity {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => "—".to_string(),
    }
}

/// One `<tr>`, addressed by `data-id` for live re-sync
pub fn render_row(record: &YieldRecord) -> String {
    let mut tags = String::new();
    for tag in record.categories().tags() {
        let _ = write!(tags, r#"<span class="tag">{}</span>"#, escape_html(tag));
    }

    let link = if record.external_url.is_empty() {
        String::new()
    } else {
        format!(
            r#"<a href="{}" target="_blank" rel="noopener noreferrer">View</a>"#,
            escape_html(&record.external_url)
        )
    };

    format!(
        concat!(
            r#"<tr data-id="{id}">"#,
            r#"<td class="protocol">{protocol}</td>"#,
            r#"<td class="asset" title="{pool}">{asset}</td>"#,
            r#"<td class="chain">{chain}</td>"#,
            r#"<td class="apy {apy_class}">{apy:.2}%</td>"#,
            r#"<td class="tvl">{tvl}</td>"#,
            r#"<td class="maturity">{maturity}</td>"#,
            r#"<td class="categories">{tags}</td>"#,
            r#"<td class="link">{link}</td>"#,
            "</tr>\n"
        ),
        id = record.id,
        protocol = escape_html(&record.protocol_name),
        pool = escape_html(&record.pool_name),
        asset = escape_html(&record.asset),
        chain = escape_html(&record.chain),
        apy_class = apy_class(record.apy),
        apy = record.apy,
        tvl = format_tvl(record.tvl),
        maturity = format_maturity(record.maturity_date.as_ref()),
        tags = tags,
        link = link,
    )
}

pub fn render_rows(records: &[YieldRecord]) -> String {
    records.iter().map(render_row).collect()
}

/// Table partial, returned alone for `HX-Request` navigation
pub fn render_table(records: &[YieldRecord], filter: &FilterSpec) -> String {
    let mut html = String::new();
    html.push_str(r#"<div id="rates-table">"#);
    let _ = write!(
        html,
        r#"<p class="summary">{} opportunities</p>"#,
        records.len()
    );
    html.push_str(r#"<table class="rates"><thead><tr>"#);
    html.push_str("<th>Protocol</th><th>Asset</th><th>Chain</th>");
    html.push_str(&sort_header("APY", SortField::Apy, filter));
    html.push_str(&sort_header("TVL", SortField::Tvl, filter));
    html.push_str("<th>Maturity</th><th>Categories</th><th></th>");
    html.push_str(r#"</tr></thead><tbody id="rates-body">"#);

    if records.is_empty() {
        html.push_str(r#"<tr class="empty"><td colspan="8">No yield opportunities match these filters</td></tr>"#);
    } else {
        html.push_str(&render_rows(records));
    }

    html.push_str("</tbody></table></div>");
    html
}

fn sort_header(label: &str, field: SortField, filter: &FilterSpec) -> String {
    // Clicking the active column flips direction; other columns start descending
    let (next_order, marker) = if filter.sort_by == field {
        match filter.sort_order {
            SortOrder::Desc => (SortOrder::Asc, " ▼"),
            SortOrder::Asc => (SortOrder::Desc, " ▲"),
        }
    } else {
        (SortOrder::Desc, "")
    };

    format!(
        r##"<th><a href="#" class="sort" data-sort-by="{}" data-sort-order="{}">{}{}</a></th>"##,
        field.as_str(),
        next_order.as_str(),
        label,
        marker
    )
}

fn select(name: &str, label: &str, options: &[String], selected: Option<&str>) -> String {
    let mut html = format!(
        r#"<label>{label}<select name="{name}"><option value="">All</option>"#,
        label = label,
        name = name
    );
    for option in options {
        let escaped = escape_html(option);
        let marker = if selected == Some(option.as_str()) { " selected" } else { "" };
        let _ = write!(html, r#"<option value="{0}"{1}>{0}</option>"#, escaped, marker);
    }
    html.push_str("</select></label>");
    html
}

fn number_input(name: &str, label: &str, value: Option<f64>) -> String {
    let value = value
        .filter(|v| *v > 0.0)
        .map(|v| v.to_string())
        .unwrap_or_default();
    format!(
        r#"<label>{}<input type="number" step="any" min="0" name="{}" value="{}"></label>"#,
        label, name, value
    )
}

fn filter_form(ctx: &PageContext<'_>) -> String {
    let filter = ctx.filter;
    let mut html = String::from(r#"<form id="filters" class="filters" action="/" method="get">"#);
    html.push_str(&select("asset", "Asset", ctx.assets, filter.asset.as_deref()));
    html.push_str(&select("chain", "Chain", ctx.chains, filter.chain.as_deref()));
    html.push_str(&select("protocol", "Protocol", ctx.protocols, filter.protocol.as_deref()));
    html.push_str(&select("categories", "Category", ctx.categories, filter.category.as_deref()));
    html.push_str(&number_input("min_apy", "Min APY %", filter.min_apy));
    html.push_str(&number_input("max_apy", "Max APY %", filter.max_apy));
    html.push_str(&number_input("min_tvl", "Min TVL $", filter.min_tvl));
    let _ = write!(
        html,
        r#"<input type="hidden" name="sort_by" value="{}"><input type="hidden" name="sort_order" value="{}">"#,
        filter.sort_by.as_str(),
        filter.sort_order.as_str()
    );
    html.push_str(r#"<button type="submit">Apply</button><a class="reset" href="/">Reset</a></form>"#);
    html
}

pub fn render_page(ctx: &PageContext<'_>) -> String {
    let refreshed = ctx
        .last_refresh
        .map(|at| at.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "pending".to_string());

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>DeFi Rates</title>
<link rel="stylesheet" href="/static/style.css">
</head>
<body>
<header>
<h1>DeFi Rates</h1>
<p class="status"><span id="live-status" class="offline">offline</span> Last refresh: <span id="last-refresh">{refreshed}</span></p>
</header>
<main>
{form}
{table}
</main>
<script src="/static/app.js"></script>
</body>
</html>
"#,
        refreshed = refreshed,
        form = filter_form(ctx),
        table = render_table(ctx.records, ctx.filter),
    )
}
