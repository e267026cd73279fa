//! Email content for each alert kind

use chrono::{DateTime, Local, Utc};

use crate::models::{AlertKind, AlertMessage, BalanceReading, Severity};

const STYLE: &str = r#"
body { font-family: Arial, sans-serif; line-height: 1.6; }
.container { max-width: 600px; margin: 0 auto; padding: 20px; }
.header { color: white; padding: 20px; border-radius: 8px 8px 0 0; }
.body { background: #f8f9fa; padding: 20px; border-radius: 0 0 8px 8px; }
.warning { color: #ff4757; font-size: 24px; font-weight: bold; }
.footer { font-size: 12px; color: #999; margin-top: 20px; }
"#;

fn severity_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "#dc3545",
        Severity::Warning => "#ff4757",
        Severity::Info => "#17a2b8",
    }
}

fn local_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn wrap(severity: Severity, title: &str, inner: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html><head><meta charset="UTF-8"><style>{STYLE}</style></head><body><div class="container">
<div class="header" style="background: {color};"><h2>{title}</h2></div>
<div class="body">
{inner}
</div></div></body></html>"#,
        color = severity_color(severity),
    )
}

/// Balance fell below the threshold
pub fn low_balance(reading: &BalanceReading, threshold: f64, cooldown_hours: f64) -> AlertMessage {
    let severity = Severity::Warning;
    let inner = format!(
        r#"<p class="warning">当前剩余电量: {kwh:.2} 度</p>
<p>电量已低于预设阈值 ({threshold:.2} 度)，请尽快充值！</p>
<p>剩余金额: ¥{money:.2} | 电价: ¥{price:.4}/度</p>
<p>查询时间: {time}</p>
<p class="footer">此邮件由宿舍电量监测程序自动发送，{cooldown_hours:.1} 小时内不会重复告警。</p>"#,
        kwh = reading.remaining_kwh,
        money = reading.remaining_money,
        price = reading.unit_price,
        time = reading.query_time_display(),
    );

    AlertMessage {
        kind: AlertKind::LowBalance,
        severity,
        subject: format!("⚠️ 宿舍电量告警 - 仅剩 {:.2} 度", reading.remaining_kwh),
        html_body: wrap(severity, "⚡ 宿舍电量不足告警", &inner),
    }
}

/// The portal stopped accepting the session cookie
pub fn auth_expired(detail: &str, at: DateTime<Utc>) -> AlertMessage {
    let severity = Severity::Critical;
    let inner = format!(
        r#"<p class="warning">登录凭证已失效</p>
<p>电量查询接口拒绝了当前 Cookie，请重新获取并更新 USER_COOKIE 配置后重启程序。</p>
<p>详情: {detail}</p>
<p>时间: {time}</p>
<p class="footer">在凭证恢复之前，本提醒只发送一次。</p>"#,
        detail = escape_html(detail),
        time = local_time(at),
    );

    AlertMessage {
        kind: AlertKind::AuthExpired,
        severity,
        subject: "❌ 电量监测 Cookie 已失效".to_string(),
        html_body: wrap(severity, "🔑 需要更新 Cookie", &inner),
    }
}

/// Several cycles in a row failed to read the balance
pub fn repeated_failures(failures: u32, last_error: &str, at: DateTime<Utc>) -> AlertMessage {
    let severity = Severity::Critical;
    let inner = format!(
        r#"<p class="warning">连续 {failures} 次获取电量数据失败</p>
<p>最近一次错误: {error}</p>
<p>时间: {time}</p>"#,
        error = escape_html(last_error),
        time = local_time(at),
    );

    AlertMessage {
        kind: AlertKind::RepeatedFailures,
        severity,
        subject: "❌ 电量监测脚本运行异常".to_string(),
        html_body: wrap(severity, "脚本运行异常", &inner),
    }
}

/// Manual SMTP check
pub fn test_message(at: DateTime<Utc>) -> AlertMessage {
    let severity = Severity::Info;
    let inner = format!(
        "<p>这是一封测试邮件，说明 SMTP 配置可用。</p>\n<p>时间: {}</p>",
        local_time(at)
    );

    AlertMessage {
        kind: AlertKind::Test,
        severity,
        subject: "✅ 电量监测邮件测试".to_string(),
        html_body: wrap(severity, "邮件配置测试", &inner),
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
