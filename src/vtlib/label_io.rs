//! Label files hold one line per box, `<class> <center x> <center y> <extent x> <extent y>`, where
//! all but the class are fractions of the image size. The two extents are called height and width
//! in that order in existing files although they run along x and y, respectively.
use std::{
    borrow::Cow,
    fs,
    path::{Path, PathBuf},
};

use tracing::{info, warn};
use vision_trainer_domain::{NormalizedBox, ShapeI, VtResult, to_vt, vterr};

use crate::{annotations::BoundingBox, file_util};

pub fn label_path(labels_dir: &Path, image_stem: &str) -> PathBuf {
    labels_dir.join(format!("{image_stem}.txt"))
}

fn parse_field(field: Option<&str>, name: &str) -> VtResult<f64> {
    let field = field.ok_or_else(|| vterr!("field {name} is missing"))?;
    let value = field
        .parse::<f64>()
        .map_err(|e| vterr!("could not parse {name} from '{field}' due to {e}"))?;
    if value.is_finite() {
        Ok(value)
    } else {
        Err(vterr!("{name} needs to be finite, got '{field}'"))
    }
}

pub fn parse_line(line: &str) -> VtResult<(usize, NormalizedBox)> {
    if line.contains(char::REPLACEMENT_CHARACTER) {
        return Err(vterr!("line contains bytes that are not valid UTF-8"));
    }
    let mut fields = line.split_whitespace();
    let class_field = fields.next().ok_or_else(|| vterr!("empty line"))?;
    let class_index = class_field
        .parse::<usize>()
        .map_err(|e| vterr!("could not parse class index from '{class_field}' due to {e}"))?;
    let normalized = NormalizedBox {
        center_x: parse_field(fields.next(), "center x")?,
        center_y: parse_field(fields.next(), "center y")?,
        field_h: parse_field(fields.next(), "height")?,
        field_w: parse_field(fields.next(), "width")?,
    };
    Ok((class_index, normalized))
}

pub fn format_line(class_index: usize, nb: &NormalizedBox) -> String {
    format!(
        "{class_index} {:?} {:?} {:?} {:?}",
        nb.center_x, nb.center_y, nb.field_h, nb.field_w
    )
}

/// Boxes of a label file's content in display coordinates. Lines that cannot be parsed are skipped.
pub fn decode_str(content: &str, shape: ShapeI) -> Vec<BoundingBox> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(line_idx, line)| match parse_line(line) {
            Ok((class_index, nb)) => Some(BoundingBox::new(class_index, nb.to_corners(shape))),
            Err(e) => {
                warn!("skipping line {} '{line}', {}", line_idx + 1, e.msg());
                None
            }
        })
        .collect()
}

/// `None` if there is no label file, i.e., the image has not been labeled yet. Bytes that are not
/// valid UTF-8 only spoil the lines they are part of.
pub fn decode(label_file: &Path, shape: ShapeI) -> VtResult<Option<Vec<BoundingBox>>> {
    if label_file.exists() {
        let bytes = fs::read(label_file)
            .map_err(|e| vterr!("could not read {label_file:?} due to {e:?}"))?;
        let content = String::from_utf8_lossy(&bytes);
        if let Cow::Owned(_) = content {
            warn!("{label_file:?} contains invalid UTF-8");
        }
        Ok(Some(decode_str(&content, shape)))
    } else {
        Ok(None)
    }
}

pub fn encode(boxes: &[BoundingBox], shape: ShapeI) -> VtResult<Vec<String>> {
    boxes
        .iter()
        .map(|bb| {
            bb.corners
                .to_normalized(shape)
                .map(|nb| format_line(bb.class_index, &nb))
        })
        .collect()
}

pub fn write_labels(label_file: &Path, boxes: &[BoundingBox], shape: ShapeI) -> VtResult<()> {
    let n_outside = boxes
        .iter()
        .filter(|bb| !bb.corners.is_contained_in(shape))
        .count();
    if n_outside > 0 {
        warn!("{n_outside} boxes of {label_file:?} reach beyond the image {shape:?}");
    }
    let lines = encode(boxes, shape)?;
    let content = lines.iter().fold(String::new(), |mut s, line| {
        s.push_str(line);
        s.push('\n');
        s
    });
    if let Some(parent) = label_file.parent() {
        file_util::create_dir_all(parent).map_err(to_vt)?;
    }
    file_util::write_atomic(label_file, content)?;
    info!("wrote {} boxes to {label_file:?}", boxes.len());
    Ok(())
}

#[cfg(test)]
use {
    crate::{defer_folder_removal, file_util::make_tmp_folder},
    rand::{Rng, SeedableRng, rngs::StdRng},
    vision_trainer_domain::Corners,
};

#[test]
fn test_decode_known_file() {
    let shape = ShapeI::new(512, 256);
    let content = "0 0.5 0.5 0.25 0.5\n2 0.1 0.2 0.1 0.1\n";
    let boxes = decode_str(content, shape);
    assert_eq!(boxes.len(), 2);
    assert_eq!(boxes[0].class_index, 0);
    assert_eq!(boxes[0].corners, Corners::new(192, 64, 320, 192));
    assert_eq!(boxes[1].class_index, 2);
    assert_eq!(boxes[1].corners, Corners::new(26, 39, 76, 63));
    assert!(boxes.iter().all(|bb| !bb.selected));
}

#[test]
fn test_decode_skips_broken_lines() {
    let shape = ShapeI::new(100, 100);
    let content = "0 0.5 0.5 0.2 0.2\nx 0.5 0.5 0.2 0.2\n1 0.5 0.5\n\n1 0.5 nan 0.2 0.2\n\
                   3 0.5 0.5 0.2 0.2 0.9\n";
    let boxes = decode_str(content, shape);
    assert_eq!(boxes.len(), 2);
    assert_eq!(boxes[0].class_index, 0);
    assert_eq!(boxes[1].class_index, 3);
}

#[test]
fn test_encode() {
    let shape = ShapeI::new(200, 100);
    let boxes = vec![
        BoundingBox::new(1, Corners::new(10, 20, 50, 60)),
        BoundingBox::new(0, Corners::new(50, 60, 10, 20)),
    ];
    let lines = encode(&boxes, shape).unwrap();
    assert_eq!(lines[0], "1 0.15 0.4 0.2 0.4");
    assert_eq!(lines[1], "0 0.15 0.4 0.2 0.4");
    assert!(encode(&boxes, ShapeI::new(0, 100)).is_err());
    let empty: Vec<String> = encode(&[], shape).unwrap();
    assert!(empty.is_empty());
}

#[test]
fn test_invalid_utf8_spoils_only_its_line() {
    let folder = make_tmp_folder("label-utf8").unwrap();
    defer_folder_removal!(&folder);
    let p = label_path(&folder, "a");
    let content = b"0 0.5 0.5 0.2 0.2\n1 0.3 0.3 0.1 0.1 \xff\n2 0.3 0.3 0.1 0\xff.1\n";
    file_util::write(&p, content).unwrap();
    let boxes = decode(&p, ShapeI::new(100, 100)).unwrap().unwrap();
    assert_eq!(boxes.len(), 1);
    assert_eq!(boxes[0].corners, Corners::new(40, 40, 60, 60));
    assert!(parse_line("0 0.5 0.5 0.2 0.2 \u{fffd}").is_err());
}

#[test]
fn test_missing_file_is_unlabeled() {
    let folder = make_tmp_folder("label-missing").unwrap();
    defer_folder_removal!(&folder);
    let res = decode(&label_path(&folder, "nope"), ShapeI::new(10, 10)).unwrap();
    assert!(res.is_none());
    let p = label_path(&folder, "empty");
    write_labels(&p, &[], ShapeI::new(10, 10)).unwrap();
    assert_eq!(decode(&p, ShapeI::new(10, 10)).unwrap(), Some(vec![]));
}

#[test]
fn test_roundtrip_random_boxes() {
    let folder = make_tmp_folder("label-roundtrip").unwrap();
    defer_folder_removal!(&folder);
    let mut rng = StdRng::seed_from_u64(7);
    for i in 0..200 {
        let shape = ShapeI::new(rng.gen_range(1..2500), rng.gen_range(1..2500));
        let (w, h) = (shape.w as i32, shape.h as i32);
        let boxes = (0..rng.gen_range(0..8))
            .map(|_| {
                BoundingBox::new(
                    rng.gen_range(0..9),
                    Corners::new(
                        rng.gen_range(0..=w),
                        rng.gen_range(0..=h),
                        rng.gen_range(0..=w),
                        rng.gen_range(0..=h),
                    ),
                )
            })
            .collect::<Vec<_>>();
        let p = label_path(&folder, &format!("img{i}"));
        write_labels(&p, &boxes, shape).unwrap();
        let decoded = decode(&p, shape).unwrap().unwrap();
        assert_eq!(decoded.len(), boxes.len());
        for (orig, dec) in boxes.iter().zip(decoded.iter()) {
            assert_eq!(orig.class_index, dec.class_index);
            let o = orig.corners.ordered();
            let d = dec.corners;
            for (a, b) in [(o.x1, d.x1), (o.y1, d.y1), (o.x2, d.x2), (o.y2, d.y2)] {
                assert!((a - b).abs() <= 1, "{o:?} vs {d:?} for {shape:?}");
            }
        }
    }
}
