//! Haar cascade eye detector.
//!
//! Reads boosted Haar cascades in the XML layout written by
//! `opencv_traincascade` (the format of the stock `haarcascade_eye.xml`) and
//! evaluates them over an image pyramid. Hits are clustered the way OpenCV's
//! `groupRectangles` does, so thresholds tuned against OpenCV carry over.

use std::path::Path;

use image::imageops::{self, FilterType};
use image::GrayImage;
use roxmltree::{Document, Node};
use tracing::{debug, trace};

use super::integral::{IntegralImage, TiltedIntegral};
use super::{EyeDetector, Rect};
use crate::error::{Error, Result};

/// Subtracted from every stage threshold on load, as OpenCV does.
const STAGE_THRESHOLD_EPS: f64 = 1e-5;

/// Cluster similarity used when grouping raw hits.
pub const GROUP_EPS: f64 = 0.2;

/// One weighted rectangle of a Haar feature, in window coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct FeatureRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct HaarFeature {
    rects: Vec<FeatureRect>,
    tilted: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f64>,
}

impl WeakClassifier {
    /// Walk the tree. Non-positive child indices name leaves.
    fn predict(&self, mut feature_value: impl FnMut(usize) -> f64) -> f64 {
        let mut idx = 0usize;
        loop {
            let node = &self.nodes[idx];
            let next = if feature_value(node.feature) < node.threshold {
                node.left
            } else {
                node.right
            };
            if next <= 0 {
                return self.leaves[next.unsigned_abs() as usize];
            }
            idx = next as usize;
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Stage {
    threshold: f64,
    classifiers: Vec<WeakClassifier>,
}

/// Parameters for [`HaarCascade::detect_multi_scale`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    /// Pyramid step, must be greater than 1.
    pub scale_factor: f64,
    /// Clusters need more than this many raw hits. 0 disables grouping.
    pub min_neighbors: u32,
    /// Smallest window, defaults to the cascade window.
    pub min_size: Option<(u32, u32)>,
    /// Largest window, defaults to the image size.
    pub max_size: Option<(u32, u32)>,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: None,
            max_size: None,
        }
    }
}

impl From<&crate::config::EyeConfig> for DetectParams {
    fn from(config: &crate::config::EyeConfig) -> Self {
        let square = |size: u32| (size > 0).then_some((size, size));
        Self {
            scale_factor: config.scale_factor,
            min_neighbors: config.min_neighbors,
            min_size: square(config.min_size),
            max_size: square(config.max_size),
        }
    }
}

/// A boosted Haar cascade classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct HaarCascade {
    window_width: u32,
    window_height: u32,
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
    has_tilted: bool,
}

/// Tables for one pyramid level.
struct ScaleTables {
    upright: IntegralImage,
    tilted: Option<TiltedIntegral>,
}

impl HaarCascade {
    /// Load a cascade from an OpenCV XML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not a boosted Haar
    /// cascade.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let xml = std::fs::read_to_string(path).map_err(|source| Error::CascadeRead {
            path: path.to_path_buf(),
            source,
        })?;
        let cascade = Self::from_xml(&xml)?;
        debug!(
            "Loaded cascade {} ({}x{} window, {} stages, {} features)",
            path.display(),
            cascade.window_width,
            cascade.window_height,
            cascade.stages.len(),
            cascade.features.len()
        );
        Ok(cascade)
    }

    /// Parse a cascade from XML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CascadeParse`] describing the first problem found.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let doc = Document::parse(xml).map_err(|e| Error::cascade(e.to_string()))?;
        let cascade = doc
            .root_element()
            .children()
            .find(Node::is_element)
            .ok_or_else(|| Error::cascade("no cascade element"))?;

        let stage_type = child_text(cascade, "stageType")?;
        if stage_type.trim() != "BOOST" {
            return Err(Error::cascade(format!(
                "unsupported stage type '{}'",
                stage_type.trim()
            )));
        }
        let feature_type = child_text(cascade, "featureType")?;
        if feature_type.trim() != "HAAR" {
            return Err(Error::cascade(format!(
                "unsupported feature type '{}'",
                feature_type.trim()
            )));
        }

        let window_width: u32 = parse_one(&child_text(cascade, "width")?, "width")?;
        let window_height: u32 = parse_one(&child_text(cascade, "height")?, "height")?;
        if window_width < 3 || window_height < 3 {
            return Err(Error::cascade(format!(
                "window {window_width}x{window_height} is too small"
            )));
        }

        let features = items(child(cascade, "features")?)
            .enumerate()
            .map(|(i, node)| parse_feature(node, i, window_width, window_height))
            .collect::<Result<Vec<_>>>()?;

        let stages = items(child(cascade, "stages")?)
            .enumerate()
            .map(|(i, node)| parse_stage(node, i, features.len()))
            .collect::<Result<Vec<_>>>()?;
        if stages.is_empty() {
            return Err(Error::cascade("cascade has no stages"));
        }

        let has_tilted = features.iter().any(|f| f.tilted);
        Ok(Self {
            window_width,
            window_height,
            stages,
            features,
            has_tilted,
        })
    }

    /// Detection window size `(width, height)` the cascade was trained on.
    #[must_use]
    pub fn window_size(&self) -> (u32, u32) {
        (self.window_width, self.window_height)
    }

    /// Number of boosting stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Whether any feature uses the rotated table.
    #[must_use]
    pub fn has_tilted_features(&self) -> bool {
        self.has_tilted
    }

    fn feature_value(&self, feature: &HaarFeature, tables: &ScaleTables, x: u32, y: u32) -> f64 {
        let mut value = 0.0;
        for r in &feature.rects {
            let sum = if feature.tilted {
                // Tables are always built when the cascade has tilted features
                tables.tilted.as_ref().map_or(0, |t| {
                    t.rotated_sum(
                        i64::from(x + r.x),
                        i64::from(y + r.y),
                        i64::from(r.width),
                        i64::from(r.height),
                    )
                }) as f64
            } else {
                tables
                    .upright
                    .rect_sum(x + r.x, y + r.y, r.width, r.height) as f64
            };
            value += r.weight * sum;
        }
        value
    }

    /// Run every stage on the window at `(x, y)`.
    fn passes(&self, tables: &ScaleTables, x: u32, y: u32) -> bool {
        let (nw, nh) = (self.window_width - 2, self.window_height - 2);
        let area = f64::from(nw) * f64::from(nh);
        let sum = tables.upright.rect_sum(x + 1, y + 1, nw, nh) as f64;
        let sq_sum = tables.upright.rect_sq_sum(x + 1, y + 1, nw, nh) as f64;
        let variance = area * sq_sum - sum * sum;
        let norm = if variance > 0.0 { variance.sqrt() } else { 1.0 };

        self.stages.iter().all(|stage| {
            let score: f64 = stage
                .classifiers
                .iter()
                .map(|wc| {
                    wc.predict(|fi| self.feature_value(&self.features[fi], tables, x, y) / norm)
                })
                .sum();
            score >= stage.threshold
        })
    }

    /// Detect objects at every scale and return grouped rectangles in
    /// source-image coordinates.
    #[must_use]
    pub fn detect_multi_scale(&self, gray: &GrayImage, params: &DetectParams) -> Vec<Rect> {
        let (iw, ih) = gray.dimensions();
        let (ww, wh) = self.window_size();
        let max_size = params.max_size.unwrap_or((iw, ih));
        let min_size = params.min_size.unwrap_or((ww, wh));
        let scale_factor = params.scale_factor.max(1.0 + f64::EPSILON);

        let mut hits = Vec::new();
        let mut factor = 1.0f64;
        loop {
            let win_w = (f64::from(ww) * factor).round() as u32;
            let win_h = (f64::from(wh) * factor).round() as u32;
            let scaled_w = (f64::from(iw) / factor).round() as u32;
            let scaled_h = (f64::from(ih) / factor).round() as u32;

            if scaled_w <= ww || scaled_h <= wh {
                break;
            }
            if win_w > max_size.0 || win_h > max_size.1 {
                break;
            }
            if win_w >= min_size.0 && win_h >= min_size.1 {
                let scaled = if scaled_w == iw && scaled_h == ih {
                    gray.clone()
                } else {
                    imageops::resize(gray, scaled_w, scaled_h, FilterType::Triangle)
                };
                let tables = ScaleTables {
                    upright: IntegralImage::new(&scaled),
                    tilted: self.has_tilted.then(|| TiltedIntegral::new(&scaled)),
                };
                let step = if factor > 2.0 { 1 } else { 2 };
                let before = hits.len();
                for y in (0..=scaled_h - wh).step_by(step) {
                    for x in (0..=scaled_w - ww).step_by(step) {
                        if self.passes(&tables, x, y) {
                            hits.push(Rect::new(
                                (f64::from(x) * factor).round() as u32,
                                (f64::from(y) * factor).round() as u32,
                                win_w,
                                win_h,
                            ));
                        }
                    }
                }
                trace!(
                    "Scale {:.3}: {}x{} image, {} hits",
                    factor,
                    scaled_w,
                    scaled_h,
                    hits.len() - before
                );
            }
            factor *= scale_factor;
        }

        group_rectangles(&hits, params.min_neighbors, GROUP_EPS)
    }
}

/// A cascade paired with the parameters it is run with.
#[derive(Debug, Clone)]
pub struct CascadeDetector {
    /// The classifier.
    pub cascade: HaarCascade,
    /// Pyramid and grouping parameters.
    pub params: DetectParams,
}

impl CascadeDetector {
    /// Pair `cascade` with `params`.
    #[must_use]
    pub fn new(cascade: HaarCascade, params: DetectParams) -> Self {
        Self { cascade, params }
    }
}

impl EyeDetector for CascadeDetector {
    fn detect_eyes(&self, gray: &GrayImage) -> Vec<Rect> {
        self.cascade.detect_multi_scale(gray, &self.params)
    }
}

/// Cluster similar rectangles and average each cluster.
///
/// Clusters with `min_neighbors` or fewer members are dropped, as are
/// clusters lying inside a stronger one. `min_neighbors == 0` returns the
/// input unchanged.
#[must_use]
pub fn group_rectangles(rects: &[Rect], min_neighbors: u32, eps: f64) -> Vec<Rect> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let n = rects.len();
    let mut parent: Vec<usize> = (0..n).collect();
    for i in 0..n {
        for j in (i + 1)..n {
            if similar(&rects[i], &rects[j], eps) {
                let (a, b) = (find_root(&mut parent, i), find_root(&mut parent, j));
                if a != b {
                    parent[b.max(a)] = a.min(b);
                }
            }
        }
    }

    // Clusters in order of first member
    let mut order: Vec<usize> = Vec::new();
    let mut sums: Vec<[f64; 4]> = Vec::new();
    let mut counts: Vec<u32> = Vec::new();
    let mut slot = vec![usize::MAX; n];
    for (i, r) in rects.iter().enumerate() {
        let root = find_root(&mut parent, i);
        if slot[root] == usize::MAX {
            slot[root] = order.len();
            order.push(root);
            sums.push([0.0; 4]);
            counts.push(0);
        }
        let s = &mut sums[slot[root]];
        s[0] += f64::from(r.x);
        s[1] += f64::from(r.y);
        s[2] += f64::from(r.width);
        s[3] += f64::from(r.height);
        counts[slot[root]] += 1;
    }

    let averaged: Vec<Rect> = sums
        .iter()
        .zip(&counts)
        .map(|(s, &c)| {
            let c = f64::from(c);
            Rect::new(
                (s[0] / c).round() as u32,
                (s[1] / c).round() as u32,
                (s[2] / c).round() as u32,
                (s[3] / c).round() as u32,
            )
        })
        .collect();

    let mut grouped = Vec::new();
    for (i, r1) in averaged.iter().enumerate() {
        let n1 = counts[i];
        if n1 <= min_neighbors {
            continue;
        }
        let nested = averaged.iter().enumerate().any(|(j, r2)| {
            let n2 = counts[j];
            if j == i || n2 <= min_neighbors {
                return false;
            }
            let dx = (f64::from(r2.width) * eps).round() as i64;
            let dy = (f64::from(r2.height) * eps).round() as i64;
            let (x1, y1) = (i64::from(r1.x), i64::from(r1.y));
            let (x2, y2) = (i64::from(r2.x), i64::from(r2.y));
            x1 >= x2 - dx
                && y1 >= y2 - dy
                && x1 + i64::from(r1.width) <= x2 + i64::from(r2.width) + dx
                && y1 + i64::from(r1.height) <= y2 + i64::from(r2.height) + dy
                && (n2 > n1.max(3) || n1 < 3)
        });
        if !nested {
            grouped.push(*r1);
        }
    }
    grouped
}

fn find_root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}

fn similar(a: &Rect, b: &Rect, eps: f64) -> bool {
    let delta = eps * (f64::from(a.width.min(b.width)) + f64::from(a.height.min(b.height))) * 0.5;
    let close = |p: u32, q: u32| (f64::from(p) - f64::from(q)).abs() <= delta;
    close(a.x, b.x)
        && close(a.y, b.y)
        && close(a.x + a.width, b.x + b.width)
        && close(a.y + a.height, b.y + b.height)
}

// === XML helpers ===

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Result<Node<'a, 'input>> {
    node.children()
        .find(|n| n.is_element() && n.has_tag_name(name))
        .ok_or_else(|| Error::cascade(format!("missing <{name}>")))
}

/// All text below `node`, so comments between values are skipped.
fn text_of(node: Node<'_, '_>) -> String {
    node.descendants()
        .filter(Node::is_text)
        .filter_map(|n| n.text())
        .collect::<Vec<_>>()
        .join(" ")
}

fn child_text(node: Node<'_, '_>, name: &str) -> Result<String> {
    Ok(text_of(child(node, name)?))
}

/// The `<_>` list entries of a sequence node.
fn items<'a, 'input>(node: Node<'a, 'input>) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children().filter(|n| n.is_element() && n.has_tag_name("_"))
}

fn parse_one<T: std::str::FromStr>(text: &str, what: &str) -> Result<T> {
    text.trim()
        .parse()
        .map_err(|_| Error::cascade(format!("invalid {what}: '{}'", text.trim())))
}

fn parse_numbers(text: &str, what: &str) -> Result<Vec<f64>> {
    text.split_whitespace()
        .map(|tok| parse_one::<f64>(tok, what))
        .collect()
}

fn parse_feature(node: Node<'_, '_>, index: usize, win_w: u32, win_h: u32) -> Result<HaarFeature> {
    let tilted = match node
        .children()
        .find(|n| n.is_element() && n.has_tag_name("tilted"))
    {
        Some(t) => parse_one::<i32>(&text_of(t), "tilted flag")? != 0,
        None => false,
    };

    let rects = items(child(node, "rects")?)
        .map(|r| {
            let v = parse_numbers(&text_of(r), "feature rect")?;
            if v.len() != 5 || v[..4].iter().any(|c| *c < 0.0) {
                return Err(Error::cascade(format!(
                    "feature {index}: expected 'x y w h weight'"
                )));
            }
            Ok(FeatureRect {
                x: v[0] as u32,
                y: v[1] as u32,
                width: v[2] as u32,
                height: v[3] as u32,
                weight: v[4],
            })
        })
        .collect::<Result<Vec<_>>>()?;

    if rects.is_empty() || rects.len() > 3 {
        return Err(Error::cascade(format!(
            "feature {index}: {} rects, expected 1 to 3",
            rects.len()
        )));
    }
    for r in &rects {
        let inside = if tilted {
            r.x >= r.height
                && r.x + r.width <= win_w
                && r.y + r.width + r.height <= win_h
        } else {
            r.x + r.width <= win_w && r.y + r.height <= win_h
        };
        if !inside {
            return Err(Error::cascade(format!(
                "feature {index}: rect leaves the {win_w}x{win_h} window"
            )));
        }
    }

    Ok(HaarFeature { rects, tilted })
}

fn parse_stage(node: Node<'_, '_>, index: usize, feature_count: usize) -> Result<Stage> {
    let threshold: f64 = parse_one(&child_text(node, "stageThreshold")?, "stage threshold")?;
    let classifiers = items(child(node, "weakClassifiers")?)
        .map(|wc| parse_weak_classifier(wc, index, feature_count))
        .collect::<Result<Vec<_>>>()?;
    if classifiers.is_empty() {
        return Err(Error::cascade(format!("stage {index} has no classifiers")));
    }
    Ok(Stage {
        threshold: threshold - STAGE_THRESHOLD_EPS,
        classifiers,
    })
}

fn parse_weak_classifier(
    node: Node<'_, '_>,
    stage: usize,
    feature_count: usize,
) -> Result<WeakClassifier> {
    let raw_nodes = parse_numbers(&child_text(node, "internalNodes")?, "internal node")?;
    let leaves = parse_numbers(&child_text(node, "leafValues")?, "leaf value")?;
    if raw_nodes.is_empty() || raw_nodes.len() % 4 != 0 {
        return Err(Error::cascade(format!(
            "stage {stage}: internalNodes must hold groups of 4 values"
        )));
    }

    let nodes: Vec<TreeNode> = raw_nodes
        .chunks_exact(4)
        .map(|c| TreeNode {
            left: c[0] as i32,
            right: c[1] as i32,
            feature: c[2] as usize,
            threshold: c[3],
        })
        .collect();

    for (i, n) in nodes.iter().enumerate() {
        if n.feature >= feature_count {
            return Err(Error::cascade(format!(
                "stage {stage}: feature index {} out of range",
                n.feature
            )));
        }
        for child in [n.left, n.right] {
            let valid = if child > 0 {
                (child as usize) > i && (child as usize) < nodes.len()
            } else {
                (child.unsigned_abs() as usize) < leaves.len()
            };
            if !valid {
                return Err(Error::cascade(format!(
                    "stage {stage}: node {i} has invalid child {child}"
                )));
            }
        }
    }

    Ok(WeakClassifier { nodes, leaves })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Luma;

    /// One-stage cascade over a 6×6 window that fires when the central 2×2
    /// block is much darker than the window.
    pub(crate) const DARK_CENTER_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>6</height>
  <width>6</width>
  <stageParams>
    <maxWeakCount>1</maxWeakCount></stageParams>
  <featureParams>
    <maxCatCount>0</maxCatCount></featureParams>
  <stageNum>1</stageNum>
  <stages>
    <!-- stage 0 -->
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>0.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 -1.</internalNodes>
          <leafValues>
            1. -1.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 6 6 -1.</_>
        <_>
          2 2 2 2 9.</_></rects></_></features></cascade>
</opencv_storage>
"#;

    fn dark_block_image(w: u32, h: u32, bx: u32, by: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            if (bx..bx + 2).contains(&x) && (by..by + 2).contains(&y) {
                Luma([20])
            } else {
                Luma([200])
            }
        })
    }

    #[test]
    fn test_parse_dark_center_cascade() {
        let cascade = HaarCascade::from_xml(DARK_CENTER_CASCADE).unwrap();
        assert_eq!(cascade.window_size(), (6, 6));
        assert_eq!(cascade.stage_count(), 1);
        assert!(!cascade.has_tilted_features());
        assert!((cascade.stages[0].threshold + STAGE_THRESHOLD_EPS).abs() < 1e-12);
    }

    #[test]
    fn test_detects_centered_dark_block() {
        let cascade = HaarCascade::from_xml(DARK_CENTER_CASCADE).unwrap();
        let img = dark_block_image(24, 24, 10, 10);
        let params = DetectParams {
            min_neighbors: 0,
            ..DetectParams::default()
        };
        let hits = cascade.detect_multi_scale(&img, &params);
        assert!(hits.contains(&Rect::new(8, 8, 6, 6)), "hits: {hits:?}");
    }

    #[test]
    fn test_cascade_detector_uses_its_params() {
        let cascade = HaarCascade::from_xml(DARK_CENTER_CASCADE).unwrap();
        let params = DetectParams {
            min_neighbors: 0,
            ..DetectParams::default()
        };
        let detector = CascadeDetector::new(cascade.clone(), params);
        let img = dark_block_image(24, 24, 10, 10);
        assert_eq!(
            detector.detect_eyes(&img),
            cascade.detect_multi_scale(&img, &params)
        );
    }

    #[test]
    fn test_uniform_image_has_no_detections() {
        let cascade = HaarCascade::from_xml(DARK_CENTER_CASCADE).unwrap();
        let img = GrayImage::from_pixel(32, 32, Luma([128]));
        let params = DetectParams {
            min_neighbors: 0,
            max_size: Some((6, 6)),
            ..DetectParams::default()
        };
        assert!(cascade.detect_multi_scale(&img, &params).is_empty());
    }

    #[test]
    fn test_image_smaller_than_window() {
        let cascade = HaarCascade::from_xml(DARK_CENTER_CASCADE).unwrap();
        let img = GrayImage::from_pixel(5, 5, Luma([0]));
        assert!(cascade
            .detect_multi_scale(&img, &DetectParams::default())
            .is_empty());
    }

    #[test]
    fn test_min_size_skips_small_windows() {
        let cascade = HaarCascade::from_xml(DARK_CENTER_CASCADE).unwrap();
        let img = dark_block_image(24, 24, 10, 10);
        let params = DetectParams {
            min_neighbors: 0,
            min_size: Some((7, 7)),
            ..DetectParams::default()
        };
        let hits = cascade.detect_multi_scale(&img, &params);
        assert!(hits.iter().all(|r| r.width >= 7 && r.height >= 7));
    }

    #[test]
    fn test_rejects_lbp_cascade() {
        let xml = DARK_CENTER_CASCADE.replace(
            "<featureType>HAAR</featureType>",
            "<featureType>LBP</featureType>",
        );
        let err = HaarCascade::from_xml(&xml).unwrap_err();
        assert!(err.to_string().contains("LBP"));
    }

    #[test]
    fn test_rejects_bad_feature_index() {
        let xml = DARK_CENTER_CASCADE.replace("0 -1 0 -1.", "0 -1 3 -1.");
        let err = HaarCascade::from_xml(&xml).unwrap_err();
        assert!(err.to_string().contains("feature index"));
    }

    #[test]
    fn test_rejects_rect_outside_window() {
        let xml = DARK_CENTER_CASCADE.replace("2 2 2 2 9.", "5 5 2 2 9.");
        let err = HaarCascade::from_xml(&xml).unwrap_err();
        assert!(err.to_string().contains("window"));
    }

    #[test]
    fn test_rejects_malformed_xml() {
        assert!(matches!(
            HaarCascade::from_xml("<opencv_storage><cascade>"),
            Err(Error::CascadeParse { .. })
        ));
    }

    fn tilted_cascade() -> HaarCascade {
        let start = DARK_CENTER_CASCADE.find("<rects>").unwrap();
        let end = DARK_CENTER_CASCADE.find("</rects>").unwrap() + "</rects>".len();
        let xml = format!(
            "{}<rects><_>3 0 2 2 -1.</_><_>3 1 1 1 8.</_></rects><tilted>1</tilted>{}",
            &DARK_CENTER_CASCADE[..start],
            &DARK_CENTER_CASCADE[end..]
        );
        HaarCascade::from_xml(&xml).unwrap()
    }

    fn tables_for(img: &GrayImage) -> ScaleTables {
        ScaleTables {
            upright: IntegralImage::new(img),
            tilted: Some(TiltedIntegral::new(img)),
        }
    }

    #[test]
    fn test_parses_tilted_feature() {
        let cascade = tilted_cascade();
        assert!(cascade.has_tilted_features());
        assert!(cascade.features[0].tilted);
        assert_eq!(cascade.features[0].rects.len(), 2);
    }

    #[test]
    fn test_tilted_feature_sums_rotated_rects() {
        let cascade = tilted_cascade();
        let feature = &cascade.features[0];

        // A w×h rotated rect covers 2·w·h pixels: -8v + 8·2v
        let flat = GrayImage::from_pixel(12, 12, Luma([10]));
        let value = cascade.feature_value(feature, &tables_for(&flat), 2, 3);
        assert!((value - 80.0).abs() < 1e-9, "value {value}");

        // Upright rects would give 1156 here
        let pattern = GrayImage::from_fn(12, 12, |x, y| Luma([((x * 29 + y * 13) % 200) as u8]));
        let value = cascade.feature_value(feature, &tables_for(&pattern), 2, 3);
        assert!((value - 1596.0).abs() < 1e-9, "value {value}");
    }

    #[test]
    fn test_rejects_tilted_rect_outside_window() {
        let xml = DARK_CENTER_CASCADE.replace(
            "2 2 2 2 9.</_></rects>",
            "2 2 2 2 9.</_></rects><tilted>1</tilted>",
        );
        let err = HaarCascade::from_xml(&xml).unwrap_err();
        assert!(err.to_string().contains("window"));
    }

    #[test]
    fn test_missing_file() {
        let err = HaarCascade::from_file("/nonexistent/haarcascade_eye.xml").unwrap_err();
        assert!(matches!(err, Error::CascadeRead { .. }));
    }

    #[test]
    fn test_tree_classifier_walks_children() {
        let wc = WeakClassifier {
            nodes: vec![
                TreeNode {
                    left: 1,
                    right: 0,
                    feature: 0,
                    threshold: 0.5,
                },
                TreeNode {
                    left: -1,
                    right: -2,
                    feature: 1,
                    threshold: 0.0,
                },
            ],
            leaves: vec![10.0, 20.0, 30.0],
        };
        assert!((wc.predict(|_| 1.0) - 10.0).abs() < f64::EPSILON);
        assert!((wc.predict(|f| if f == 0 { 0.0 } else { -1.0 }) - 20.0).abs() < f64::EPSILON);
        assert!((wc.predict(|f| if f == 0 { 0.0 } else { 1.0 }) - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_group_rectangles_merges_cluster() {
        let rects = vec![
            Rect::new(10, 10, 20, 20),
            Rect::new(11, 10, 20, 20),
            Rect::new(10, 11, 20, 20),
            Rect::new(12, 12, 21, 21),
            Rect::new(200, 200, 20, 20),
        ];
        let grouped = group_rectangles(&rects, 3, GROUP_EPS);
        assert_eq!(grouped, vec![Rect::new(11, 11, 20, 20)]);
    }

    #[test]
    fn test_group_rectangles_threshold_is_exclusive() {
        let rects = vec![Rect::new(10, 10, 20, 20); 3];
        assert!(group_rectangles(&rects, 3, GROUP_EPS).is_empty());
        assert_eq!(group_rectangles(&rects, 2, GROUP_EPS).len(), 1);
    }

    #[test]
    fn test_group_rectangles_drops_nested_weaker_cluster() {
        let mut rects = vec![Rect::new(0, 0, 100, 100); 8];
        rects.extend(vec![Rect::new(30, 30, 30, 30); 4]);
        let grouped = group_rectangles(&rects, 3, GROUP_EPS);
        assert_eq!(grouped, vec![Rect::new(0, 0, 100, 100)]);
    }

    #[test]
    fn test_group_rectangles_zero_neighbors_is_passthrough() {
        let rects = vec![Rect::new(1, 2, 3, 4), Rect::new(1, 2, 3, 4)];
        assert_eq!(group_rectangles(&rects, 0, GROUP_EPS), rects);
    }
}
