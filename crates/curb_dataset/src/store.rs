//! Split manifests, per-image annotation records and image loading.

use crate::types::{BoxYxyx, ChwImage, DatasetError, DatasetResult, Example, Split, UnlabeledImage};
use crate::vocab::{Label, Scene};
use ndarray::Array3;
use std::fs;
use std::path::{Path, PathBuf};

pub const MANIFEST_DIR: &str = "ImageSets/Main";
pub const ANNOTATIONS_DIR: &str = "Annotations";
pub const IMAGES_DIR: &str = "JPEGImages";
pub const IMAGE_EXT: &str = "jpg";

/// What `AnnotationStore::get` yields for a given split.
#[derive(Debug, Clone)]
pub enum StoreItem {
    Annotated(Example),
    Unlabeled(UnlabeledImage),
}

/// Indexable view over one split of a `JPEGImages/` + `Annotations/` corpus.
#[derive(Debug, Clone)]
pub struct AnnotationStore {
    root: PathBuf,
    split: Split,
    ids: Vec<String>,
    use_difficult: bool,
}

impl AnnotationStore {
    /// Read `ImageSets/Main/<split>.txt` under `root`. Blank lines are ignored.
    pub fn open(root: impl AsRef<Path>, split: Split, use_difficult: bool) -> DatasetResult<Self> {
        let root = root.as_ref().to_path_buf();
        let manifest = manifest_path(&root, split);
        if !manifest.is_file() {
            return Err(DatasetError::MissingSplit {
                split: split.to_string(),
                path: manifest,
            });
        }
        let raw = fs::read_to_string(&manifest).map_err(|e| DatasetError::Io {
            path: manifest.clone(),
            source: e,
        })?;
        let ids: Vec<String> = raw
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();
        log::debug!(
            "opened split {} under {} ({} ids)",
            split,
            root.display(),
            ids.len()
        );
        Ok(Self {
            root,
            split,
            ids,
            use_difficult,
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn split(&self) -> Split {
        self.split
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn id(&self, index: usize) -> DatasetResult<&str> {
        self.ids
            .get(index)
            .map(String::as_str)
            .ok_or(DatasetError::OutOfRange {
                index,
                len: self.ids.len(),
            })
    }

    pub fn get(&self, index: usize) -> DatasetResult<StoreItem> {
        if self.split.is_inference() {
            self.image(index).map(StoreItem::Unlabeled)
        } else {
            self.example(index).map(StoreItem::Annotated)
        }
    }

    /// Parse the annotation record and load the image for `index`.
    pub fn example(&self, index: usize) -> DatasetResult<Example> {
        if self.split.is_inference() {
            return Err(DatasetError::Other(format!(
                "split {} has no annotation records",
                self.split
            )));
        }
        let id = self.id(index)?;
        let anno_path = self.root.join(ANNOTATIONS_DIR).join(format!("{id}.xml"));
        if !anno_path.is_file() {
            return Err(DatasetError::AnnotationMissing {
                id: id.to_string(),
                path: anno_path,
            });
        }
        let raw = fs::read_to_string(&anno_path).map_err(|e| DatasetError::Io {
            path: anno_path.clone(),
            source: e,
        })?;
        let objects = parse_annotation(&raw, &anno_path)?;

        let mut boxes = Vec::with_capacity(objects.len());
        let mut labels = Vec::with_capacity(objects.len());
        let mut difficult = Vec::with_capacity(objects.len());
        let mut scene = Vec::with_capacity(objects.len());
        for obj in objects {
            if obj.difficult && !self.use_difficult {
                continue;
            }
            boxes.push(obj.bbox);
            labels.push(obj.label);
            difficult.push(obj.difficult);
            scene.push(obj.scene);
        }

        let image = read_image(id, &self.image_path(id))?;
        Ok(Example {
            id: id.to_string(),
            image,
            boxes,
            labels,
            difficult,
            scene,
        })
    }

    /// Load only the image for `index`; valid for every split.
    pub fn image(&self, index: usize) -> DatasetResult<UnlabeledImage> {
        let id = self.id(index)?;
        let image = read_image(id, &self.image_path(id))?;
        Ok(UnlabeledImage {
            id: id.to_string(),
            image,
        })
    }

    fn image_path(&self, id: &str) -> PathBuf {
        self.root.join(IMAGES_DIR).join(format!("{id}.{IMAGE_EXT}"))
    }
}

pub fn manifest_path(root: &Path, split: Split) -> PathBuf {
    root.join(MANIFEST_DIR).join(format!("{}.txt", split.as_str()))
}

/// One `<object>` entry, with the box already shifted to 0-based indices.
#[derive(Debug, Clone, PartialEq)]
pub struct AnnotatedObject {
    pub bbox: BoxYxyx,
    pub label: Label,
    pub difficult: bool,
    pub scene: Scene,
}

/// Parse every top-level `<object>` of a VOC-style record.
pub fn parse_annotation(xml: &str, path: &Path) -> DatasetResult<Vec<AnnotatedObject>> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| DatasetError::Xml {
        path: path.to_path_buf(),
        source: e,
    })?;
    let malformed = |msg: String| DatasetError::Malformed {
        path: path.to_path_buf(),
        msg,
    };

    let mut objects = Vec::new();
    for (i, obj) in doc
        .root_element()
        .children()
        .filter(|n| n.has_tag_name("object"))
        .enumerate()
    {
        // Records without a <difficult> tag count as not difficult.
        let difficult = match child_text(obj, "difficult") {
            Some(t) => t
                .parse::<i32>()
                .map_err(|_| malformed(format!("object[{i}] difficult '{t}' is not an integer")))?
                == 1,
            None => false,
        };

        let bndbox = obj
            .children()
            .find(|n| n.has_tag_name("bndbox"))
            .ok_or_else(|| malformed(format!("object[{i}] has no bndbox")))?;
        let mut bbox = [0.0f32; 4];
        for (slot, tag) in bbox.iter_mut().zip(["ymin", "xmin", "ymax", "xmax"]) {
            let text = child_text(bndbox, tag)
                .ok_or_else(|| malformed(format!("object[{i}] bndbox missing {tag}")))?;
            let v = text
                .parse::<f32>()
                .map_err(|_| malformed(format!("object[{i}] bndbox {tag} '{text}' not numeric")))?;
            *slot = v - 1.0;
        }

        let name = child_text(obj, "name")
            .ok_or_else(|| malformed(format!("object[{i}] has no name")))?;
        let label = Label::from_name(name).ok_or_else(|| DatasetError::UnknownLabel {
            name: name.to_string(),
            path: path.to_path_buf(),
        })?;

        let scene_name = child_text(obj, "type")
            .ok_or_else(|| malformed(format!("object[{i}] has no scene type")))?;
        let scene = Scene::from_name(scene_name).ok_or_else(|| DatasetError::UnknownScene {
            name: scene_name.to_string(),
            path: path.to_path_buf(),
        })?;

        objects.push(AnnotatedObject {
            bbox,
            label,
            difficult,
            scene,
        });
    }
    Ok(objects)
}

fn child_text<'a>(node: roxmltree::Node<'a, '_>, tag: &str) -> Option<&'a str> {
    node.children()
        .find(|n| n.has_tag_name(tag))
        .and_then(|n| n.text())
        .map(str::trim)
}

/// Load an image file as RGB, CHW, values in 0..=255.
pub fn read_image(id: &str, path: &Path) -> DatasetResult<ChwImage> {
    if !path.is_file() {
        return Err(DatasetError::ImageMissing {
            id: id.to_string(),
            path: path.to_path_buf(),
        });
    }
    let rgb = image::open(path)
        .map_err(|e| DatasetError::Image {
            path: path.to_path_buf(),
            source: e,
        })?
        .to_rgb8();
    Ok(rgb_to_chw(&rgb))
}

pub fn rgb_to_chw(rgb: &image::RgbImage) -> ChwImage {
    let (w, h) = rgb.dimensions();
    let mut chw = Array3::<f32>::zeros((3, h as usize, w as usize));
    for (x, y, pixel) in rgb.enumerate_pixels() {
        for c in 0..3 {
            chw[[c, y as usize, x as usize]] = pixel[c] as f32;
        }
    }
    chw
}

#[cfg(test)]
mod tests {
    use super::*;

    const RECORD: &str = r#"<annotation>
  <filename>0001.jpg</filename>
  <object>
    <name> Curb </name>
    <type>intersection</type>
    <difficult>0</difficult>
    <bndbox><xmin>11</xmin><ymin>21</ymin><xmax>51</xmax><ymax>61</ymax></bndbox>
  </object>
  <object>
    <name>curb</name>
    <type>obstacle</type>
    <difficult>1</difficult>
    <bndbox><xmin>1</xmin><ymin>1</ymin><xmax>5</xmax><ymax>5</ymax></bndbox>
  </object>
</annotation>"#;

    #[test]
    fn parses_objects_with_zero_based_boxes() {
        let objs = parse_annotation(RECORD, Path::new("0001.xml")).unwrap();
        assert_eq!(objs.len(), 2);
        assert_eq!(objs[0].bbox, [20.0, 10.0, 60.0, 50.0]);
        assert_eq!(objs[0].label, Label::Curb);
        assert_eq!(objs[0].scene, Scene::Intersection);
        assert!(!objs[0].difficult);
        assert!(objs[1].difficult);
    }

    #[test]
    fn unknown_names_are_rejected() {
        let bad_label = RECORD.replacen(" Curb ", "lamp", 1);
        let err = parse_annotation(&bad_label, Path::new("x.xml")).unwrap_err();
        assert!(matches!(err, DatasetError::UnknownLabel { ref name, .. } if name == "lamp"));

        let bad_scene = RECORD.replacen("intersection", "roundabout", 1);
        let err = parse_annotation(&bad_scene, Path::new("x.xml")).unwrap_err();
        assert!(matches!(err, DatasetError::UnknownScene { .. }));
    }

    #[test]
    fn missing_bndbox_is_malformed() {
        let xml = "<annotation><object><name>curb</name><type>obstacle</type></object></annotation>";
        let err = parse_annotation(xml, Path::new("x.xml")).unwrap_err();
        assert!(matches!(err, DatasetError::Malformed { .. }));
    }
}
