//! Publication parsing.
//!
//! [`PublicationParser`] is the seam between the cache and whatever turns a
//! file on disk into a [`Publication`]. [`EpubParser`] is the default
//! implementation: it reads `META-INF/container.xml`, follows it to the OPF
//! package document and maps metadata, manifest and spine onto the web
//! publication model.
//!
//! Package documents are scanned with a handful of regular expressions rather
//! than a full XML parser. This covers the attribute and element shapes EPUB
//! producers emit in practice; documents that need namespace resolution to be
//! understood are out of reach.

use crate::error::ParseError;
use crate::publication::{Link, Metadata, Publication};
use regex::Regex;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use percent_encoding::percent_decode_str;
use std::sync::LazyLock;
use url::Url;
use zip::ZipArchive;

/// Location of the OCF container document.
pub const CONTAINER_PATH: &str = "META-INF/container.xml";

const BOOK_TYPE: &str = "http://schema.org/Book";

/// Turns a file on disk into a [`Publication`].
///
/// Implementations are called from a blocking worker thread and may perform
/// synchronous I/O.
pub trait PublicationParser: Send + Sync {
    /// Parse the publication at `path`, using `manifest_url` as its `self` link.
    ///
    /// # Errors
    ///
    /// Returns `ParseError` if the file cannot be read or is not a valid
    /// publication.
    fn parse(&self, path: &Path, manifest_url: &str) -> Result<Publication, ParseError>;
}

/// Parser for EPUB 2 and EPUB 3 archives.
#[derive(Debug, Clone, Copy, Default)]
pub struct EpubParser;

impl PublicationParser for EpubParser {
    fn parse(&self, path: &Path, manifest_url: &str) -> Result<Publication, ParseError> {
        let file = File::open(path).map_err(|source| ParseError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut archive = ZipArchive::new(BufReader::new(file))?;

        let container = read_entry_string(&mut archive, CONTAINER_PATH)?;
        let opf_path = rootfile_path(&container)?;
        let opf = read_entry_string(&mut archive, &opf_path)?;

        let fallback_title = path
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut publication = build_publication(&opf, &opf_path, manifest_url, &fallback_title)?;
        publication.source = Some(path.to_path_buf());

        tracing::debug!(
            "Parsed {:?}: {} reading order items, {} resources",
            path,
            publication.reading_order.len(),
            publication.resources.len()
        );

        Ok(publication)
    }
}

fn read_entry_string<R: Read + std::io::Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<String, ParseError> {
    let mut entry = match archive.by_name(name) {
        Ok(entry) => entry,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(ParseError::MissingEntry(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| ParseError::Malformed {
        document: name.to_string(),
        reason: format!("not valid UTF-8: {e}"),
    })
}

/// Compile a pattern that is fixed at build time.
#[allow(clippy::expect_used)]
fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("static pattern is valid")
}

static TAG_ROOTFILE: LazyLock<Regex> = LazyLock::new(|| pattern(r"<(?:\w+:)?rootfile\b([^>]*)>"));
static TAG_ITEM: LazyLock<Regex> = LazyLock::new(|| pattern(r"<(?:\w+:)?item\b([^>]*)>"));
static TAG_ITEMREF: LazyLock<Regex> = LazyLock::new(|| pattern(r"<(?:\w+:)?itemref\b([^>]*)>"));
static TAG_SPINE: LazyLock<Regex> = LazyLock::new(|| pattern(r"<(?:\w+:)?spine\b([^>]*)>"));
static TAG_META: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r"(?s)<(?:\w+:)?meta\b([^>]*?)(?:/>|>(.*?)</(?:\w+:)?meta>)")
});
static DC_ELEMENT: LazyLock<Regex> =
    LazyLock::new(|| pattern(r"(?s)<dc:([a-z]+)\b[^>]*>(.*?)</dc:[a-z]+>"));
static ATTRIBUTE: LazyLock<Regex> = LazyLock::new(|| {
    pattern(r#"([A-Za-z_][-A-Za-z0-9_.:]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
});
static INNER_TAG: LazyLock<Regex> = LazyLock::new(|| pattern(r"<[^>]*>"));

/// Look up an attribute value inside the attribute section of a tag.
fn attribute(attributes: &str, name: &str) -> Option<String> {
    ATTRIBUTE.captures_iter(attributes).find_map(|caps| {
        (&caps[1] == name).then(|| {
            let value = caps.get(2).or_else(|| caps.get(3)).map_or("", |m| m.as_str());
            unescape(value)
        })
    })
}

/// Resolve XML predefined and numeric character entities.
fn unescape(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&tail[..=end]),
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

fn element_text(raw: &str) -> String {
    unescape(INNER_TAG.replace_all(raw, "").trim())
}

fn rootfile_path(container: &str) -> Result<String, ParseError> {
    TAG_ROOTFILE
        .captures_iter(container)
        .find_map(|caps| attribute(&caps[1], "full-path"))
        .filter(|path| !path.is_empty())
        .ok_or_else(|| ParseError::Malformed {
            document: CONTAINER_PATH.to_string(),
            reason: "no rootfile with a full-path attribute".to_string(),
        })
}

/// Root of the URL space archive entries are resolved in.
static ARCHIVE_ROOT: LazyLock<Url> = LazyLock::new(archive_root);

#[allow(clippy::expect_used)]
fn archive_root() -> Url {
    Url::parse("epub:///").expect("static base URL is valid")
}

/// Resolve an href found in the package document to an archive entry path.
///
/// Relative references are resolved against the package document and reduced
/// to a percent-decoded entry path; query and fragment are dropped. Absolute
/// references to another scheme point outside the archive and are kept as-is.
pub(crate) fn resolve_href(opf_path: &str, href: &str) -> String {
    let resolved = ARCHIVE_ROOT
        .join(opf_path)
        .and_then(|base| base.join(href));

    match resolved {
        Ok(url) if url.scheme() == ARCHIVE_ROOT.scheme() => {
            let path = url.path().trim_start_matches('/');
            percent_decode_str(path).decode_utf8_lossy().into_owned()
        }
        Ok(_) => href.to_string(),
        Err(e) => {
            tracing::warn!("Unresolvable href {:?} in {}: {}", href, opf_path, e);
            href.to_string()
        }
    }
}

struct ManifestItem {
    id: String,
    link: Link,
}

fn build_publication(
    opf: &str,
    opf_path: &str,
    manifest_url: &str,
    fallback_title: &str,
) -> Result<Publication, ParseError> {
    let mut metadata = Metadata {
        kind: BOOK_TYPE.to_string(),
        ..Metadata::default()
    };

    for caps in DC_ELEMENT.captures_iter(opf) {
        let text = element_text(&caps[2]);
        if text.is_empty() {
            continue;
        }
        match &caps[1] {
            "identifier" if metadata.identifier.is_empty() => metadata.identifier = text,
            "title" if metadata.title.is_empty() => metadata.title = text,
            "creator" => metadata.author.push(text),
            "language" => metadata.language.push(text),
            "publisher" if metadata.publisher.is_none() => metadata.publisher = Some(text),
            "description" if metadata.description.is_none() => {
                metadata.description = Some(text);
            }
            _ => {}
        }
    }
    if metadata.title.is_empty() {
        fallback_title.clone_into(&mut metadata.title);
    }

    let mut cover_id = None;
    for caps in TAG_META.captures_iter(opf) {
        let attrs = &caps[1];
        if attribute(attrs, "property").as_deref() == Some("dcterms:modified") {
            if let Some(text) = caps.get(2).map(|m| element_text(m.as_str())) {
                metadata.modified = Some(text);
            }
        } else if attribute(attrs, "name").as_deref() == Some("cover") {
            cover_id = attribute(attrs, "content");
        }
    }

    let toc_id = TAG_SPINE
        .captures(opf)
        .and_then(|caps| attribute(&caps[1], "toc"));

    let mut items = Vec::new();
    for caps in TAG_ITEM.captures_iter(opf) {
        let attrs = &caps[1];
        let (Some(id), Some(href)) = (attribute(attrs, "id"), attribute(attrs, "href")) else {
            continue;
        };
        let properties: Vec<String> = attribute(attrs, "properties")
            .map(|p| p.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let rel = if properties.iter().any(|p| p == "nav") {
            Some("contents".to_string())
        } else if properties.iter().any(|p| p == "cover-image") || cover_id.as_deref() == Some(id.as_str()) {
            Some("cover".to_string())
        } else {
            None
        };

        items.push(ManifestItem {
            link: Link {
                href: resolve_href(opf_path, &href),
                media_type: attribute(attrs, "media-type"),
                rel,
                title: None,
                properties,
            },
            id,
        });
    }

    if items.is_empty() {
        return Err(ParseError::Malformed {
            document: opf_path.to_string(),
            reason: "package manifest lists no items".to_string(),
        });
    }

    // EPUB 2 books only declare their table of contents through the spine.
    if !items.iter().any(|item| item.link.rel.as_deref() == Some("contents")) {
        if let Some(item) = items.iter_mut().find(|item| Some(&item.id) == toc_id.as_ref()) {
            item.link.rel = Some("contents".to_string());
        }
    }

    let mut publication = Publication::new(manifest_url, metadata);
    let mut in_spine = HashSet::new();
    for caps in TAG_ITEMREF.captures_iter(opf) {
        let Some(idref) = attribute(&caps[1], "idref") else {
            continue;
        };
        if !in_spine.insert(idref.clone()) {
            continue;
        }
        match items.iter().find(|item| item.id == idref) {
            Some(item) => publication.reading_order.push(item.link.clone()),
            None => tracing::warn!("Spine references unknown manifest item '{}'", idref),
        }
    }

    publication.resources = items
        .into_iter()
        .filter(|item| !in_spine.contains(&item.id))
        .map(|item| item.link)
        .collect();

    Ok(publication)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use std::path::PathBuf;
    use zip::write::SimpleFileOptions;

    pub(crate) const CONTAINER_XML: &str = r#"<?xml version="1.0"?>
<container version="1.0" xmlns="urn:oasis:names:tc:opendocument:xmlns:container">
  <rootfiles>
    <rootfile full-path="OEBPS/content.opf" media-type="application/oebps-package+xml"/>
  </rootfiles>
</container>"#;

    pub(crate) const CONTENT_OPF: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0" unique-identifier="uid">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:identifier id="uid">urn:uuid:1234</dc:identifier>
    <dc:title>Moby Dick; or, The Whale</dc:title>
    <dc:creator>Herman Melville</dc:creator>
    <dc:language>en</dc:language>
    <dc:publisher>Harper &amp; Brothers</dc:publisher>
    <meta property="dcterms:modified">2020-01-01T00:00:00Z</meta>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="ch1" href="text/chapter%201.xhtml" media-type="application/xhtml+xml"/>
    <item id="ch2" href="text/chapter2.xhtml" media-type="application/xhtml+xml"/>
    <item id="css" href="../styles/main.css" media-type="text/css"/>
    <item id="cover" href="images/cover.jpg" media-type="image/jpeg" properties="cover-image"/>
    <item id="audio" href="media/track.mp3" media-type="audio/mpeg"/>
  </manifest>
  <spine>
    <itemref idref="ch1"/>
    <itemref idref="ch2"/>
  </spine>
</package>"#;

    /// Write an EPUB with the given extra entries next to the standard fixtures.
    pub(crate) fn write_epub(path: &Path, extra: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let options = SimpleFileOptions::default();

        zip.start_file("mimetype", stored).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        zip.start_file(CONTAINER_PATH, options).unwrap();
        zip.write_all(CONTAINER_XML.as_bytes()).unwrap();
        zip.start_file("OEBPS/content.opf", options).unwrap();
        zip.write_all(CONTENT_OPF.as_bytes()).unwrap();
        for (name, bytes) in extra {
            zip.start_file(*name, options).unwrap();
            zip.write_all(bytes).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_parse_epub() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("moby.epub");
        write_epub(&path, &[]);

        let publication = EpubParser
            .parse(&path, "http://localhost:1/id/manifest.json")
            .unwrap();

        assert_eq!(publication.metadata.title, "Moby Dick; or, The Whale");
        assert_eq!(publication.metadata.identifier, "urn:uuid:1234");
        assert_eq!(publication.metadata.author, vec!["Herman Melville".to_string()]);
        assert_eq!(publication.metadata.language, vec!["en".to_string()]);
        assert_eq!(publication.metadata.publisher.as_deref(), Some("Harper & Brothers"));
        assert_eq!(publication.metadata.modified.as_deref(), Some("2020-01-01T00:00:00Z"));
        assert_eq!(
            publication.manifest_url(),
            Some("http://localhost:1/id/manifest.json")
        );
        assert_eq!(publication.source, Some(PathBuf::from(&path)));

        let order: Vec<&str> = publication
            .reading_order
            .iter()
            .map(|l| l.href.as_str())
            .collect();
        assert_eq!(order, vec!["OEBPS/text/chapter 1.xhtml", "OEBPS/text/chapter2.xhtml"]);

        let resources: Vec<&str> = publication.resources.iter().map(|l| l.href.as_str()).collect();
        assert_eq!(
            resources,
            vec![
                "OEBPS/nav.xhtml",
                "styles/main.css",
                "OEBPS/images/cover.jpg",
                "OEBPS/media/track.mp3"
            ]
        );
        assert_eq!(publication.resources[0].rel.as_deref(), Some("contents"));
        assert_eq!(publication.resources[2].rel.as_deref(), Some("cover"));
    }

    #[test]
    fn test_parse_missing_file() {
        let err = EpubParser
            .parse(Path::new("/nonexistent/book.epub"), "http://x/y/manifest.json")
            .unwrap_err();
        assert!(matches!(err, ParseError::Open { .. }));
    }

    #[test]
    fn test_parse_not_an_archive() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not a zip file").unwrap();
        let err = EpubParser
            .parse(file.path(), "http://x/y/manifest.json")
            .unwrap_err();
        assert!(matches!(err, ParseError::Archive(_)));
    }

    #[test]
    fn test_parse_missing_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.epub");
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        zip.start_file("mimetype", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        zip.finish().unwrap();

        let err = EpubParser.parse(&path, "http://x/y/manifest.json").unwrap_err();
        assert!(matches!(err, ParseError::MissingEntry(ref name) if name == CONTAINER_PATH));
    }

    #[test]
    fn test_epub2_toc_and_cover_meta() {
        let opf = r#"<package version="2.0">
  <metadata><meta name="cover" content="img"/></metadata>
  <manifest>
    <item id="ncx" href="toc.ncx" media-type="application/x-dtbncx+xml"/>
    <item id="img" href="cover.png" media-type="image/png"/>
    <item id="c1" href="c1.html" media-type="application/xhtml+xml"/>
  </manifest>
  <spine toc="ncx"><itemref idref="c1"/></spine>
</package>"#;
        let publication = build_publication(opf, "content.opf", "http://x/y/manifest.json", "Fallback").unwrap();

        assert_eq!(publication.metadata.title, "Fallback");
        assert_eq!(publication.resources[0].rel.as_deref(), Some("contents"));
        assert_eq!(publication.resources[1].rel.as_deref(), Some("cover"));
        assert_eq!(publication.reading_order[0].href, "c1.html");
    }

    #[test]
    fn test_resolve_href() {
        assert_eq!(resolve_href("OEBPS/content.opf", "ch1.xhtml#p1"), "OEBPS/ch1.xhtml");
        assert_eq!(resolve_href("OEBPS/content.opf", "../images/a.png"), "images/a.png");
        assert_eq!(resolve_href("content.opf", "./a%20b.css"), "a b.css");
        assert_eq!(resolve_href("content.opf", "/root.css"), "root.css");
        assert_eq!(resolve_href("OEBPS/content.opf", "../../escape.css"), "escape.css");
    }

    #[test]
    fn test_resolve_href_remote_and_query() {
        assert_eq!(
            resolve_href("OEBPS/content.opf", "https://fonts.example.com/a.woff"),
            "https://fonts.example.com/a.woff"
        );
        assert_eq!(resolve_href("OEBPS/content.opf", "img.png?v=2"), "OEBPS/img.png");
        assert_eq!(resolve_href("OEBPS/content.opf", "text/ch%C3%A9.xhtml"), "OEBPS/text/ch\u{e9}.xhtml");
    }

    #[test]
    fn test_build_publication_remote_resources() {
        let opf = r#"<package version="3.0">
  <metadata><dc:title>Remote</dc:title></metadata>
  <manifest>
    <item id="c1" href="c1.xhtml" media-type="application/xhtml+xml"/>
    <item id="font" href="https://fonts.example.com/a.woff" media-type="font/woff"/>
    <item id="img" href="img.png?v=2" media-type="image/png"/>
  </manifest>
  <spine><itemref idref="c1"/></spine>
</package>"#;
        let publication =
            build_publication(opf, "OEBPS/content.opf", "http://x/y/manifest.json", "Remote").unwrap();

        let hrefs: Vec<&str> = publication.resources.iter().map(|l| l.href.as_str()).collect();
        assert_eq!(hrefs, vec!["https://fonts.example.com/a.woff", "OEBPS/img.png"]);
        assert_eq!(publication.reading_order[0].href, "OEBPS/c1.xhtml");
    }

    #[test]
    fn test_unescape() {
        assert_eq!(unescape("a &amp; b &lt;c&gt; &#65;&#x42;"), "a & b <c> AB");
        assert_eq!(unescape("broken &unknown; &"), "broken &unknown; &");
    }
}
