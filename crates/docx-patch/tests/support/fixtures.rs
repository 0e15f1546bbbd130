#![allow(dead_code)]

//! Small synthetic WordprocessingML / DrawingML parts and packages for integration tests.

use std::io::{Cursor, Write};

use zip::write::FileOptions;
use zip::ZipWriter;

pub const NS_W: &str = "http://schemas.openxmlformats.org/wordprocessingml/2006/main";
pub const NS_C: &str = "http://schemas.openxmlformats.org/drawingml/2006/chart";
pub const NS_A: &str = "http://schemas.openxmlformats.org/drawingml/2006/main";
pub const NS_R: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";

/// A `word/document.xml` whose body holds `body` followed by the final section properties.
pub fn document(body: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<w:document xmlns:w="{NS_W}" xmlns:r="{NS_R}"><w:body>{body}<w:sectPr><w:pgSz w:w="12240" w:h="15840"/></w:sectPr></w:body></w:document>"#
    )
}

/// One paragraph with one run per entry of `runs`.
pub fn paragraph(runs: &[&str]) -> String {
    let mut out = String::from("<w:p>");
    for text in runs {
        out.push_str(&format!(r#"<w:r><w:t xml:space="preserve">{text}</w:t></w:r>"#));
    }
    out.push_str("</w:p>");
    out
}

/// A bar chart part holding `n` series laid out column by column from `B`, each with
/// `points` categories/values starting at row 2.
pub fn bar_chart(n: usize, points: usize) -> String {
    let mut series = String::new();
    for i in 0..n {
        let col = (b'B' + i as u8) as char;
        let last_row = points + 1;
        series.push_str("\n      ");
        series.push_str(&format!(
            r#"<c:ser><c:idx val="{i}"/><c:order val="{i}"/><c:tx><c:strRef><c:f>Sheet1!${col}$1</c:f><c:strCache><c:ptCount val="1"/><c:pt idx="0"><c:v>Series {i}</c:v></c:pt></c:strCache></c:strRef></c:tx><c:spPr><a:solidFill><a:schemeClr val="accent{}"/></a:solidFill></c:spPr><c:invertIfNegative val="0"/><c:cat><c:strRef><c:f>Sheet1!$A$2:$A${last_row}</c:f><c:strCache><c:ptCount val="{points}"/></c:strCache></c:strRef></c:cat><c:val><c:numRef><c:f>Sheet1!${col}$2:${col}${last_row}</c:f><c:numCache><c:formatCode>General</c:formatCode><c:ptCount val="{points}"/></c:numCache></c:numRef></c:val></c:ser>"#,
            i + 1
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>
<c:chartSpace xmlns:c="{NS_C}" xmlns:a="{NS_A}" xmlns:r="{NS_R}">
  <c:chart>
    <c:plotArea>
      <c:layout/>
      <c:barChart>
      <c:barDir val="col"/>
      <c:grouping val="clustered"/>
      <c:varyColors val="0"/>{series}
      <c:gapWidth val="219"/>
      <c:axId val="10"/>
      <c:axId val="20"/>
      </c:barChart>
      <c:catAx><c:axId val="10"/></c:catAx>
      <c:valAx><c:axId val="20"/></c:valAx>
    </c:plotArea>
  </c:chart>
  <c:externalData r:id="rId1"><c:autoUpdate val="0"/></c:externalData>
</c:chartSpace>"#
    )
}

/// Text between the first `open` and the `close` that follows it.
pub fn between<'a>(haystack: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = haystack.find(open)? + open.len();
    let end = start + haystack[start..].find(close)?;
    Some(&haystack[start..end])
}

/// Drop every `<...>` tag, keeping only character data.
pub fn strip_tags(xml: &[u8]) -> String {
    let mut out = String::new();
    let mut in_tag = false;
    for ch in String::from_utf8_lossy(xml).chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        FileOptions::<()>::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, bytes) in entries {
        zip.start_file(*name, options).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap().into_inner()
}
