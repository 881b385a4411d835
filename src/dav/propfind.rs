/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! PROPFIND multistatus parsing.

use anyhow::Context;
use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

/// One resource from a multistatus response. `path` is the decoded href.
#[derive(Debug, Clone, PartialEq)]
pub struct DavEntry {
    pub path: String,
    pub is_dir: bool,
    pub modified: Option<DateTime<Utc>>,
    pub size: u64,
}

#[derive(Default)]
struct PendingEntry {
    href: String,
    is_dir: bool,
    modified: Option<DateTime<Utc>>,
    size: u64,
}

enum Field {
    None,
    Href,
    ResourceType,
    LastModified,
    ContentLength,
}

/// Parses a 207 multistatus body. Element prefixes vary between servers,
/// so tags are matched on their local names only.
pub fn parse_multistatus(body: &str) -> anyhow::Result<Vec<DavEntry>> {
    let mut reader = Reader::from_str(body);
    let mut entries = vec![];
    let mut pending = PendingEntry::default();
    let mut field = Field::None;

    loop {
        let event = reader
            .read_event()
            .with_context(|| "failed to parse multistatus response")?;
        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"response" => pending = PendingEntry::default(),
                b"href" => field = Field::Href,
                b"resourcetype" => field = Field::ResourceType,
                b"getlastmodified" => field = Field::LastModified,
                b"getcontentlength" => field = Field::ContentLength,
                b"collection" => {
                    if let Field::ResourceType = field {
                        pending.is_dir = true;
                    }
                }
                _ => {}
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"collection" {
                    if let Field::ResourceType = field {
                        pending.is_dir = true;
                    }
                }
            }
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .with_context(|| "failed to parse multistatus response")?;
                let text = text.trim();
                if text.is_empty() {
                    continue;
                }
                match field {
                    Field::Href => pending.href.push_str(text),
                    Field::LastModified => pending.modified = parse_http_date(text),
                    Field::ContentLength => pending.size = text.parse().unwrap_or(0),
                    _ => {}
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"response" => {
                    let path = urlencoding::decode(&pending.href)
                        .map(|p| p.into_owned())
                        .unwrap_or_else(|_| pending.href.clone());
                    entries.push(DavEntry {
                        path,
                        is_dir: pending.is_dir,
                        modified: pending.modified,
                        size: pending.size,
                    });
                    pending = PendingEntry::default();
                }
                b"href" | b"resourcetype" | b"getlastmodified" | b"getcontentlength" => {
                    field = Field::None
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(entries)
}

/// RFC 1123 dates as sent in `getlastmodified`, e.g.
/// `Sat, 06 Jun 2015 16:52:05 GMT`. Unparseable values become `None` and
/// the entry is treated as very old.
fn parse_http_date(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, "%a, %d %b %Y %H:%M:%S GMT")
        .ok()
        .map(|t| t.and_utc())
}
