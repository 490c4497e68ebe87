use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

use super::RawSource;
use crate::error::{PipelineError, Result};
use crate::types::{RawItem, RawLink, TitleCell};

/// Crawls a paginated listing table. Page 0 is the base URL, page n appends `&page=n`.
pub struct HtmlTableSource {
    client: reqwest::blocking::Client,
    base_url: String,
    pages: usize,
}

impl HtmlTableSource {
    pub fn new(base_url: &str, pages: usize, timeout_secs: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.to_string(),
            pages,
        })
    }

    pub fn page_url(&self, page: usize) -> String {
        if page == 0 {
            self.base_url.clone()
        } else {
            format!("{}&page={}", self.base_url, page)
        }
    }

    fn fetch_page(&self, page: usize) -> Result<Vec<RawItem>> {
        let url = self.page_url(page);
        debug!(page, url = %url, "Fetching listing page");
        let body = self.client.get(&url).send()?.error_for_status()?.text()?;
        parse_listing_page(&body)
    }
}

impl RawSource for HtmlTableSource {
    fn name(&self) -> &str {
        "html_table"
    }

    #[instrument(skip(self), fields(stage = "extract", pages = self.pages))]
    fn fetch(&mut self) -> Result<Vec<RawItem>> {
        let mut items = Vec::new();
        for page in 0..self.pages {
            // A broken page must not abort the crawl
            match self.fetch_page(page) {
                Ok(rows) => {
                    info!(page, rows = rows.len(), "Listing page scraped");
                    items.extend(rows);
                }
                Err(e) => error!(page, "Failed to scrape listing page: {}", e),
            }
        }
        info!(total = items.len(), "Extraction complete");
        Ok(items)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| PipelineError::Extract(format!("bad selector '{}': {:?}", css, e)))
}

fn cell_text(element: ElementRef<'_>) -> String {
    let joined = element.text().collect::<Vec<_>>().join(" ");
    joined.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses one listing page into raw rows. A page without a table body yields no rows.
pub fn parse_listing_page(html: &str) -> Result<Vec<RawItem>> {
    let document = Html::parse_document(html);
    let tbody_sel = selector("tbody")?;
    let row_sel = selector("tr")?;
    let title_sel = selector("td.views-field-title")?;
    let anchor_sel = selector("a")?;
    let summary_sel = selector("td.views-field-body")?;
    let date_cell_sel = selector("td.views-field-field-fecha--1")?;
    let date_span_sel = selector("span.date-display-single")?;

    let Some(tbody) = document.select(&tbody_sel).next() else {
        warn!("Listing page has no table body");
        return Ok(Vec::new());
    };

    let rows = tbody
        .select(&row_sel)
        .map(|row| {
            let title_cell = row.select(&title_sel).next().map(|cell| TitleCell {
                link: cell.select(&anchor_sel).next().map(|a| RawLink {
                    text: cell_text(a),
                    href: a.value().attr("href").map(str::to_string),
                }),
            });

            let summary = row.select(&summary_sel).next().map(cell_text);

            let date = row.select(&date_cell_sel).next().map(|cell| {
                match cell.select(&date_span_sel).next() {
                    Some(span) => span
                        .value()
                        .attr("content")
                        .map(str::to_string)
                        .unwrap_or_else(|| cell_text(span)),
                    None => cell_text(cell),
                }
            });

            RawItem {
                title_cell,
                summary,
                date,
            }
        })
        .collect();

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    const PAGE: &str = r#"
<html><body><table>
<thead><tr><th>Título</th></tr></thead>
<tbody>
  <tr>
    <td class="views-field views-field-title"><a href="/normativa/resolucion-1">Resolución 1 de 2024</a></td>
    <td class="views-field views-field-body"> por la cual se
       adopta el manual </td>
    <td class="views-field views-field-field-fecha--1">
      <span class="date-display-single" content="2024-03-15T00:00:00-05:00">15/03/2024</span>
    </td>
  </tr>
  <tr>
    <td class="views-field views-field-title">Sin enlace</td>
    <td class="views-field views-field-field-fecha--1">01/02/2024</td>
  </tr>
  <tr>
    <td class="views-field views-field-body">huérfano</td>
  </tr>
</tbody>
</table></body></html>
"#;

    #[test]
    fn test_parses_rows() {
        let rows = parse_listing_page(PAGE).unwrap();
        assert_eq!(rows.len(), 3);

        let first = &rows[0];
        let link = first.title_cell.as_ref().unwrap().link.as_ref().unwrap();
        assert_eq!(link.text, "Resolución 1 de 2024");
        assert_eq!(link.href.as_deref(), Some("/normativa/resolucion-1"));
        assert_eq!(first.summary.as_deref(), Some("por la cual se adopta el manual"));
        assert_eq!(first.date.as_deref(), Some("2024-03-15T00:00:00-05:00"));
    }

    #[test]
    fn test_partial_rows_keep_their_gaps() {
        let rows = parse_listing_page(PAGE).unwrap();
        assert!(rows[1].title_cell.as_ref().unwrap().link.is_none());
        assert_eq!(rows[1].date.as_deref(), Some("01/02/2024"));
        assert!(rows[2].title_cell.is_none());
        assert_eq!(rows[2].date, None);
    }

    #[test]
    fn test_page_without_table_body() {
        assert!(parse_listing_page("<html><body><p>Sin resultados</p></body></html>")
            .unwrap()
            .is_empty());
    }

    /// Answers one connection per status in order and returns the listing base URL.
    fn serve(statuses: Vec<u16>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            for status in statuses {
                let (mut stream, _) = listener.accept().unwrap();
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    let n = stream.read(&mut buf).unwrap();
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                }
                let body = if status == 200 { PAGE } else { "boom" };
                let response = format!(
                    "HTTP/1.1 {} X\r\nContent-Type: text/html; charset=utf-8\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                stream.write_all(response.as_bytes()).unwrap();
            }
        });
        format!("http://{}/normativa?type=All", addr)
    }

    #[test]
    fn test_failed_page_is_skipped_and_crawl_continues() {
        let mut source = HtmlTableSource {
            client: reqwest::blocking::Client::builder()
                .no_proxy()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap(),
            base_url: serve(vec![200, 500, 200]),
            pages: 3,
        };
        let rows = source.fetch().unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0], rows[3]);
    }

    #[test]
    fn test_page_urls() {
        let source = HtmlTableSource::new("https://example.org/normativa?type=All", 3, 5).unwrap();
        assert_eq!(source.page_url(0), "https://example.org/normativa?type=All");
        assert_eq!(source.page_url(2), "https://example.org/normativa?type=All&page=2");
    }
}
