// src/views.rs
use crate::models::{HistoryLine, LeaderboardEntry, PortfolioSummary, Quote};
use rust_decimal::{Decimal, RoundingStrategy};

/// Formats an amount as US dollars, e.g. `$1,234.50`.
pub fn usd(value: Decimal) -> String {
    let rounded = value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    let sign = if rounded.is_sign_negative() && !rounded.is_zero() {
        "-"
    } else {
        ""
    };
    let text = format!("{:.2}", rounded.abs());
    let (whole, cents) = text.split_once('.').unwrap_or((text.as_str(), "00"));

    let mut grouped = String::with_capacity(whole.len() + whole.len() / 3);
    for (i, c) in whole.chars().enumerate() {
        if i > 0 && (whole.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    format!("{sign}${grouped}.{cents}")
}

pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, logged_in: bool, main: &str) -> String {
    let nav = if logged_in {
        r#"<ul>
    <li><a href="/quote">Quote</a></li>
    <li><a href="/buy">Buy</a></li>
    <li><a href="/sell">Sell</a></li>
    <li><a href="/history">History</a></li>
    <li><a href="/leaderboard">Leaderboard</a></li>
    <li><a href="/logout">Log Out</a></li>
  </ul>"#
    } else {
        r#"<ul>
    <li><a href="/register">Register</a></li>
    <li><a href="/login">Log In</a></li>
  </ul>"#
    };
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1">
  <title>C$50 Finance: {title}</title>
</head>
<body>
<nav>
  <a href="/">C$50 Finance</a>
  {nav}
</nav>
<main>
{main}
</main>
</body>
</html>
"#,
        title = escape(title),
    )
}

pub fn apology(message: &str, code: u16) -> String {
    layout(
        "Apology",
        false,
        &format!(
            r#"<h1>{code}</h1>
<p class="apology">{}</p>"#,
            escape(message)
        ),
    )
}

pub fn login() -> String {
    layout(
        "Log In",
        false,
        r#"<form action="/login" method="post">
  <input autocomplete="off" autofocus name="username" placeholder="Username" type="text">
  <input name="password" placeholder="Password" type="password">
  <button type="submit">Log In</button>
</form>"#,
    )
}

pub fn register() -> String {
    layout(
        "Register",
        false,
        r#"<form action="/register" method="post">
  <input autocomplete="off" autofocus name="username" placeholder="Username" type="text">
  <input name="password" placeholder="Password" type="password">
  <input name="confirmation" placeholder="Confirm password" type="password">
  <button type="submit">Register</button>
</form>"#,
    )
}

pub fn quote_form() -> String {
    layout(
        "Quote",
        true,
        r#"<form action="/quote" method="post">
  <input autocomplete="off" autofocus name="symbol" placeholder="Symbol" type="text">
  <button type="submit">Quote</button>
</form>"#,
    )
}

pub fn quoted(quote: &Quote) -> String {
    layout(
        "Quoted",
        true,
        &format!(
            "<p>A share of {} ({}) costs {}.</p>",
            escape(&quote.name),
            escape(&quote.symbol),
            usd(quote.price)
        ),
    )
}

pub fn buy_form() -> String {
    layout(
        "Buy",
        true,
        r#"<form action="/buy" method="post">
  <input autocomplete="off" autofocus name="symbol" placeholder="Symbol" type="text">
  <input min="1" name="shares" placeholder="Shares" type="number">
  <button type="submit">Buy</button>
</form>"#,
    )
}

pub fn sell_form(symbols: &[String]) -> String {
    let options: String = symbols
        .iter()
        .map(|s| format!(r#"    <option value="{0}">{0}</option>"#, escape(s)))
        .collect::<Vec<_>>()
        .join("\n");
    layout(
        "Sell",
        true,
        &format!(
            r#"<form action="/sell" method="post">
  <select name="symbol">
    <option disabled selected value="">Symbol</option>
{options}
  </select>
  <input min="1" name="shares" placeholder="Shares" type="number">
  <button type="submit">Sell</button>
</form>"#
        ),
    )
}

pub fn index(username: &str, summary: &PortfolioSummary) -> String {
    let rows: String = summary
        .holdings
        .iter()
        .map(|h| {
            format!(
                "    <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape(&h.symbol),
                escape(&h.name),
                h.shares,
                usd(h.price),
                usd(h.total)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    layout(
        "Portfolio",
        true,
        &format!(
            r#"<h2>{user}</h2>
<table>
  <thead>
    <tr><th>Symbol</th><th>Name</th><th>Shares</th><th>Price</th><th>TOTAL</th></tr>
  </thead>
  <tbody>
{rows}
    <tr><td colspan="4">CASH</td><td>{cash}</td></tr>
  </tbody>
  <tfoot>
    <tr><td colspan="4"></td><td>{total}</td></tr>
  </tfoot>
</table>"#,
            user = escape(username),
            cash = usd(summary.cash),
            total = usd(summary.total),
        ),
    )
}

pub fn history(lines: &[HistoryLine]) -> String {
    let rows: String = lines
        .iter()
        .map(|line| {
            let r = &line.record;
            format!(
                "    <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                r.operation,
                escape(&r.symbol),
                escape(&line.name),
                r.shares,
                usd(r.price),
                r.timestamp.format("%Y-%m-%d %H:%M:%S")
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    layout(
        "History",
        true,
        &format!(
            r#"<table>
  <thead>
    <tr><th>Operation</th><th>Symbol</th><th>Name</th><th>Shares</th><th>Price</th><th>Transacted</th></tr>
  </thead>
  <tbody>
{rows}
  </tbody>
</table>"#
        ),
    )
}

pub fn leaderboard(entries: &[LeaderboardEntry]) -> String {
    let rows: String = entries
        .iter()
        .enumerate()
        .map(|(i, e)| {
            format!(
                "    <tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                i + 1,
                escape(&e.username),
                usd(e.cash),
                usd(e.assets)
            )
        })
        .collect::<Vec<_>>()
        .join("\n");
    layout(
        "Leaderboard",
        true,
        &format!(
            r#"<table>
  <thead>
    <tr><th>#</th><th>User</th><th>Cash</th><th>Total assets</th></tr>
  </thead>
  <tbody>
{rows}
  </tbody>
</table>"#
        ),
    )
}
