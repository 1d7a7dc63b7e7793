//! Request value parsing.
//!
//! Path params, the query string and, for non-GET requests, the body are
//! merged into the context's value map. JSON objects and form fields land in
//! `form`; multipart files are written to the site's upload directory and
//! described in `upload`; their bytes are written chunk by chunk as the
//! parser yields them. Anything else is kept as the raw body text.

use crate::context::Context;
use crate::value::{Value, collapse, display, group_pairs};
use bytes::Bytes;
use http::Method;
use serde_json::json;
use std::io::Write;
use tempfile::NamedTempFile;
use tracing::warn;

pub(crate) fn parsing(ctx: &mut Context) {
    let params: Vec<(String, Value)> = ctx
        .params
        .iter()
        .map(|(key, value)| (key.clone(), param_value(value)))
        .collect();
    ctx.value.extend(params);

    let query = ctx.request().uri().query().map(str::to_string);
    if let Some(query) = query {
        let pairs = form_pairs(query.as_bytes());
        for (key, values) in group_pairs(pairs) {
            if let Some(value) = collapse(values) {
                ctx.query.insert(key.clone(), value.clone());
                ctx.value.insert(key, value);
            }
        }
    }

    if ctx.method != Method::GET {
        parse_body(ctx);
    }

    ctx.next();
}

fn param_value(value: &Value) -> Value {
    match value {
        Value::String(_) => value.clone(),
        Value::Array(items) => {
            let items: Vec<Value> = items
                .iter()
                .map(|item| Value::String(display(item)))
                .collect();
            collapse(items).unwrap_or(Value::Null)
        }
        other => Value::String(display(other)),
    }
}

fn form_pairs(bytes: &[u8]) -> Vec<(String, String)> {
    serde_urlencoded::from_bytes(bytes).unwrap_or_default()
}

fn insert_form(ctx: &mut Context, key: String, value: Value) {
    ctx.form.insert(key.clone(), value.clone());
    ctx.value.insert(key, value);
}

fn parse_body(ctx: &mut Context) {
    let content_type = ctx.header("content-type").unwrap_or_default().to_string();
    let lowered = content_type.to_lowercase();
    let body = ctx.request().body().clone();

    if lowered.contains("json") {
        match serde_json::from_slice::<Value>(&body) {
            Ok(Value::Object(map)) => {
                for (key, value) in map {
                    insert_form(ctx, key, value);
                }
            }
            Ok(_) => {}
            Err(err) => warn!(error = %err, "Malformed JSON body"),
        }
    } else if lowered.starts_with("multipart/form-data") {
        parse_multipart(ctx, &content_type, body);
    } else if lowered.starts_with("application/x-www-form-urlencoded") {
        for (key, values) in group_pairs(form_pairs(&body)) {
            if let Some(value) = collapse(values) {
                insert_form(ctx, key, value);
            }
        }
    } else if !body.is_empty() {
        ctx.body = Some(String::from_utf8_lossy(&body).into_owned());
    }
}

fn parse_multipart(ctx: &mut Context, content_type: &str, body: Bytes) {
    let boundary = match multer::parse_boundary(content_type) {
        Ok(boundary) => boundary,
        Err(err) => {
            warn!(error = %err, "Multipart body without a usable boundary");
            ctx.body = Some(String::from_utf8_lossy(&body).into_owned());
            return;
        }
    };

    let stream = futures::stream::once(async move { Ok::<Bytes, std::io::Error>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut fields: Vec<(String, String)> = Vec::new();
    let mut files: Vec<(String, Value)> = Vec::new();

    let parsed = futures::executor::block_on(async {
        while let Some(field) = multipart.next_field().await? {
            let Some(key) = field.name().map(str::to_string) else {
                continue;
            };

            match field.file_name().map(str::to_string) {
                None => fields.push((key, field.text().await?)),
                Some(filename) => {
                    if filename.is_empty() {
                        continue;
                    }
                    let mut field = field;
                    if let Some(descriptor) = store_upload(ctx, &filename, &mut field).await? {
                        files.push((key, descriptor));
                    }
                }
            }
        }
        Ok::<(), multer::Error>(())
    });

    if let Err(err) = parsed {
        warn!(error = %err, "Multipart body parsing stopped early");
    }

    for (key, values) in group_pairs(fields) {
        if let Some(value) = collapse(values) {
            insert_form(ctx, key, value);
        }
    }

    let mut grouped: Vec<(String, Vec<Value>)> = Vec::new();
    for (key, descriptor) in files {
        match grouped.iter_mut().find(|(k, _)| *k == key) {
            Some((_, list)) => list.push(descriptor),
            None => grouped.push((key, vec![descriptor])),
        }
    }
    for (key, descriptors) in grouped {
        if let Some(value) = collapse(descriptors) {
            ctx.upload.insert(key.clone(), value.clone());
            ctx.value.insert(key, value);
        }
    }
}

/// Stream one uploaded file into `upload_*.<ext>` and describe it.
///
/// The temp file is created on the first non-empty chunk, so an empty part
/// leaves nothing behind. A file that cannot be written is dropped, which
/// removes it.
async fn store_upload(
    ctx: &mut Context,
    filename: &str,
    field: &mut multer::Field<'_>,
) -> Result<Option<Value>, multer::Error> {
    let mime = field
        .content_type()
        .map(|m| m.to_string())
        .unwrap_or_default();
    let ext = match filename.rfind('.') {
        Some(at) if at > 0 => &filename[at + 1..],
        _ => "",
    };

    let mut file: Option<NamedTempFile> = None;
    let mut size: u64 = 0;
    let mut failed = false;

    while let Some(chunk) = field.chunk().await? {
        if failed || chunk.is_empty() {
            continue;
        }
        if file.is_none() {
            match ctx.upload_file(ext) {
                Ok(created) => file = Some(created),
                Err(err) => {
                    warn!(error = %err, filename, "Cannot create upload file");
                    failed = true;
                    continue;
                }
            }
        }
        if let Some(handle) = file.as_mut() {
            if let Err(err) = handle.write_all(&chunk) {
                warn!(error = %err, filename, "Cannot write upload file");
                failed = true;
                continue;
            }
        }
        size += chunk.len() as u64;
    }

    let Some(file) = file.filter(|_| !failed) else {
        return Ok(None);
    };
    let path = ctx.keep_upload(file.into_temp_path());
    Ok(Some(json!({
        "name": filename,
        "type": ext,
        "mime": mime,
        "size": size,
        "file": path.to_string_lossy(),
    })))
}
