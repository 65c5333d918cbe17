use crate::market::view::SortOrder;

const PLACEHOLDER: &str = "-";

pub fn format_price(price: f64) -> String {
    if !price.is_finite() {
        return PLACEHOLDER.to_string();
    }
    let magnitude = price.abs();
    if magnitude >= 100.0 {
        format!("{price:.2}")
    } else if magnitude >= 0.1 {
        format!("{price:.4}")
    } else {
        format!("{price:.6}")
    }
}

/// Millions, rounded, grouped with `,` every three digits: `1,234 M`.
pub fn format_market_cap(market_cap: f64) -> String {
    if !market_cap.is_finite() {
        return PLACEHOLDER.to_string();
    }
    let millions = (market_cap / 1_000_000.0).round();
    let sign = if millions < 0.0 { "-" } else { "" };
    format!("{sign}{} M", group_thousands(millions.abs() as u64))
}

pub fn format_change_percent(percent: f64) -> String {
    if !percent.is_finite() {
        return PLACEHOLDER.to_string();
    }
    let arrow = if percent >= 0.0 { '▲' } else { '▼' };
    format!("{arrow}{:.2}%", percent.abs())
}

pub fn sort_indicator(order: SortOrder) -> &'static str {
    match order {
        SortOrder::Asc => " ▲",
        SortOrder::Desc => " ▼",
        SortOrder::None => "",
    }
}

fn group_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (position, digit) in digits.chars().enumerate() {
        if position > 0 && (digits.len() - position) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    grouped
}
