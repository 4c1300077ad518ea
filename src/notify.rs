// src/notify.rs

use crate::config::SmtpSettings;
use crate::error::{BotError, Result};
use lettre::message::header::ContentType;
use lettre::message::{Attachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const SUBJECT: &str = "Notificación: Ejecución del Bot Finalizada";

const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Plain-text body for a finished spreadsheet.
pub fn completion_body(file_name: &str, pending: usize) -> String {
    if pending == 0 {
        format!("El bot ha finalizado su ejecución. Todas las filas de {file_name} han sido procesadas.")
    } else {
        format!(
            "El bot ha finalizado su ejecución. {file_name} quedó con {pending} filas sin procesar \
             tras alcanzar el límite de intentos; revise la columna \"Mensaje Error\"."
        )
    }
}

pub fn build_message(from: &str, to: &str, subject: &str, body: &str, attachment: &Path) -> Result<Message> {
    let file_name = attachment
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("reporte.xlsx")
        .to_string();
    let content = fs::read(attachment)?;
    let mime = ContentType::parse(XLSX_MIME).map_err(|e| BotError::Mail(e.to_string()))?;

    Message::builder()
        .from(from.parse().map_err(|e| BotError::Mail(format!("bad sender {from}: {e}")))?)
        .to(to.parse().map_err(|e| BotError::Mail(format!("bad recipient {to}: {e}")))?)
        .subject(subject)
        .multipart(
            MultiPart::mixed()
                .singlepart(
                    SinglePart::builder()
                        .header(ContentType::TEXT_PLAIN)
                        .body(body.to_string()),
                )
                .singlepart(Attachment::new(file_name).body(content, mime)),
        )
        .map_err(|e| BotError::Mail(e.to_string()))
}

fn send_one(smtp: &SmtpSettings, creds: &Credentials, message: Message) -> Result<()> {
    let mailer = SmtpTransport::relay(&smtp.server)
        .map_err(|e| BotError::Mail(format!("SMTP relay error: {e}")))?
        .credentials(creds.clone())
        .build();
    mailer
        .send(&message)
        .map_err(|e| BotError::Mail(e.to_string()))?;
    Ok(())
}

/// Email every recipient with the spreadsheet attached.
///
/// Never fails: missing settings and send errors are only logged.
pub fn notify_completion(
    smtp: Option<&SmtpSettings>,
    recipients: &[String],
    attachment: &Path,
    body: &str,
) {
    let Some(smtp) = smtp else {
        warn!("No SMTP settings, completion email skipped");
        return;
    };
    let (Ok(username), Ok(password)) = (std::env::var("SMTP_USERNAME"), std::env::var("SMTP_PASSWORD")) else {
        warn!("SMTP_USERNAME / SMTP_PASSWORD not set, completion email skipped");
        return;
    };
    let creds = Credentials::new(username, password);

    for to in recipients {
        let sent = build_message(&smtp.from, to, SUBJECT, body, attachment)
            .and_then(|message| send_one(smtp, &creds, message));
        match sent {
            Ok(()) => info!(to = %to, "Completion email sent"),
            Err(e) => warn!(to = %to, error = %e, "Completion email failed"),
        }
    }
}
