//! Neural network inference on top of `tract-onnx`.

pub mod tensor;

use std::{ops::Index, ops::RangeInclusive, path::Path, sync::Arc};

use anyhow::{bail, Context};
use tract_onnx::prelude::{
    tvec, Framework, Graph, InferenceModelExt, SimplePlan, TValue, TVec, TypedFact, TypedModel,
    TypedOp,
};

use crate::image::{AsImageView, Color, ImageView, Resolution};
use tensor::Tensor;

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A convolutional network taking a single RGB image as input.
///
/// Cheap to [`Clone`]; clones share the loaded network.
#[derive(Clone)]
pub struct Cnn {
    nn: NeuralNetwork,
    shape: CnnInputShape,
    input_res: Resolution,
    color_mapper: ColorMapper,
}

impl Cnn {
    /// Wraps `nn`, which must have exactly one input whose shape matches `shape`.
    pub fn new(
        nn: NeuralNetwork,
        shape: CnnInputShape,
        color_mapper: ColorMapper,
    ) -> anyhow::Result<Self> {
        let [input] = nn.inputs() else {
            bail!(
                "CNN must take exactly 1 input, this one takes {}",
                nn.inputs().len()
            );
        };

        let (w, h) = match (shape, input.shape()) {
            (CnnInputShape::NCHW, &[1, 3, h, w]) | (CnnInputShape::NHWC, &[1, h, w, 3]) => (w, h),
            (_, other) => bail!("input shape {other:?} does not fit a {shape:?} CNN"),
        };

        Ok(Self {
            input_res: Resolution::new(w.try_into()?, h.try_into()?),
            nn,
            shape,
            color_mapper,
        })
    }

    /// Wraps `nn`, taking the input layout from the shape of its input.
    ///
    /// Networks converted from TensorFlow Lite are usually NHWC, PyTorch exports NCHW. See
    /// [`CnnInputShape::detect`].
    pub fn with_detected_layout(
        nn: NeuralNetwork,
        color_mapper: ColorMapper,
    ) -> anyhow::Result<Self> {
        let shape = match nn.inputs() {
            [input] => CnnInputShape::detect(input.shape()).with_context(|| {
                format!(
                    "input shape {:?} is neither NCHW nor NHWC with 3 channels",
                    input.shape()
                )
            })?,
            inputs => bail!("CNN must take exactly 1 input, this one takes {}", inputs.len()),
        };
        Self::new(nn, shape, color_mapper)
    }

    /// Returns the layout of the network's input tensor.
    #[inline]
    pub fn input_shape(&self) -> CnnInputShape {
        self.shape
    }

    /// Returns the resolution of the network's input image.
    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    /// Samples `image` into the network's input tensor.
    ///
    /// The image is stretched to the input resolution if the aspect ratios differ.
    pub fn image_to_tensor<V: AsImageView>(&self, image: &V) -> Tensor {
        let view = image.as_view();
        let (w, h) = (
            self.input_res.width() as usize,
            self.input_res.height() as usize,
        );
        let sx = view.width() as f32 / w as f32;
        let sy = view.height() as f32 / h as f32;
        let sample = |x: usize, y: usize, c: usize| {
            let color = sample_nearest(&view, (x as f32 + 0.5) * sx, (y as f32 + 0.5) * sy);
            self.color_mapper.map(color)[c]
        };

        match self.shape {
            CnnInputShape::NCHW => {
                Tensor::from_shape_fn([1, 3, h, w], |[_, c, y, x]| sample(x, y, c))
            }
            CnnInputShape::NHWC => {
                Tensor::from_shape_fn([1, h, w, 3], |[_, y, x, c]| sample(x, y, c))
            }
        }
    }

    /// Runs the network on `image`.
    pub fn estimate<V: AsImageView>(&self, image: &V) -> anyhow::Result<Outputs> {
        self.nn.estimate(&Inputs::from(self.image_to_tensor(image)))
    }
}

fn sample_nearest(view: &ImageView<'_>, x: f32, y: f32) -> Color {
    view.get(x as u32, y as u32)
}

/// Maps 8-bit colors to the value range a network was trained on.
///
/// The alpha channel is dropped; networks see RGB.
#[derive(Debug, Clone)]
pub struct ColorMapper {
    start: f32,
    scale: f32,
}

impl ColorMapper {
    /// Maps each channel linearly from `0..=255` to `target_range`.
    ///
    /// # Panics
    ///
    /// Panics if `target_range` is empty.
    pub fn linear(target_range: RangeInclusive<f32>) -> Self {
        let (start, end) = target_range.into_inner();
        assert!(end > start, "empty color range {start}..={end}");
        Self {
            start,
            scale: (end - start) / 255.0,
        }
    }

    fn map(&self, color: Color) -> [f32; 3] {
        [color.r(), color.g(), color.b()].map(|c| f32::from(c) * self.scale + self.start)
    }
}

/// Order of the dimensions of a CNN's input tensor.
///
/// `N` is the batch size (always 1 here), `C` the color channel, `H` and `W` the image height and
/// width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CnnInputShape {
    /// `[N, C, H, W]`
    NCHW,
    /// `[N, H, W, C]`
    NHWC,
}

impl CnnInputShape {
    /// Determines the layout of a 3-channel image tensor of shape `shape`.
    ///
    /// A `[1, 3, 3, 3]` tensor fits both layouts and is taken as NCHW.
    pub fn detect(shape: &[usize]) -> Option<Self> {
        match shape {
            [1, 3, _, _] => Some(Self::NCHW),
            [1, _, _, 3] => Some(Self::NHWC),
            _ => None,
        }
    }
}

/// Builder returned by [`NeuralNetwork::from_path`] and [`NeuralNetwork::from_onnx`].
pub struct Loader {
    model_data: Vec<u8>,
}

impl Loader {
    /// Parses and optimizes the network.
    ///
    /// Fails if the ONNX data is malformed, if the graph uses operators `tract` does not
    /// implement, or if an input or output shape is not fully known.
    pub fn load(self) -> anyhow::Result<NeuralNetwork> {
        let graph = tract_onnx::onnx()
            .model_for_read(&mut &*self.model_data)?
            .into_optimized()?;
        NeuralNetwork::from_graph(graph)
    }
}

/// A loaded, optimized network, ready for inference on the CPU.
///
/// Cheap to [`Clone`]; clones share the loaded network.
#[derive(Clone)]
pub struct NeuralNetwork(Arc<NeuralNetworkImpl>);

struct NeuralNetworkImpl {
    plan: Plan,
    inputs: Vec<NodeInfo>,
    outputs: Vec<NodeInfo>,
}

impl NeuralNetwork {
    fn from_graph(graph: TypedModel) -> anyhow::Result<Self> {
        let plan = SimplePlan::new(graph)?;

        let model = plan.model();
        let inputs = (0..model.inputs.len())
            .map(|i| NodeInfo::new(model, model.inputs[i], model.input_fact(i)?))
            .collect::<anyhow::Result<Vec<_>>>()?;
        let outputs = (0..model.outputs.len())
            .map(|i| NodeInfo::new(model, model.outputs[i], model.output_fact(i)?))
            .collect::<anyhow::Result<Vec<_>>>()?;

        Ok(NeuralNetwork(Arc::new(NeuralNetworkImpl {
            plan,
            inputs,
            outputs,
        })))
    }

    /// Reads an ONNX model file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Loader> {
        let path = path.as_ref();
        if path.extension().map_or(true, |ext| ext != "onnx") {
            bail!(
                "network file '{}' must have an `.onnx` extension",
                path.display()
            );
        }

        let model_data = std::fs::read(path)
            .with_context(|| format!("failed to read network from '{}'", path.display()))?;
        Ok(Self::from_onnx(model_data))
    }

    /// Uses an in-memory ONNX model.
    pub fn from_onnx(model_data: impl Into<Vec<u8>>) -> Loader {
        Loader {
            model_data: model_data.into(),
        }
    }

    pub fn inputs(&self) -> &[NodeInfo] {
        &self.0.inputs
    }

    pub fn outputs(&self) -> &[NodeInfo] {
        &self.0.outputs
    }

    /// Runs the network on `inputs`, one tensor per network input.
    #[doc(alias = "infer")]
    pub fn estimate(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        if inputs.len() != self.inputs().len() {
            bail!(
                "network takes {} inputs, but {} were given",
                self.inputs().len(),
                inputs.len()
            );
        }

        let values = inputs
            .inner
            .iter()
            .map(|t| Ok(TValue::from_const(Arc::new(t.to_tract()?))))
            .collect::<anyhow::Result<TVec<_>>>()?;
        let outputs = self.0.plan.run(values)?;
        let inner = outputs
            .iter()
            .map(|value| Tensor::from_tract(value))
            .collect::<anyhow::Result<_>>()?;
        Ok(Outputs { inner })
    }
}

/// Name and shape of a network input or output.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    name: String,
    shape: Vec<usize>,
}

impl NodeInfo {
    fn new(
        model: &Graph<TypedFact, Box<dyn TypedOp>>,
        outlet: tract_onnx::prelude::OutletId,
        fact: &TypedFact,
    ) -> anyhow::Result<Self> {
        let name = model.node(outlet.node).name.clone();
        let shape = fact
            .shape
            .as_concrete()
            .with_context(|| format!("network node '{name}' has a symbolic shape"))?
            .to_vec();
        Ok(Self { name, shape })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }
}

/// Output tensors of one inference pass, in network output order.
#[derive(Debug)]
pub struct Outputs {
    inner: TVec<Tensor>,
}

impl Outputs {
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Tensor> {
        self.inner.iter()
    }
}

impl Index<usize> for Outputs {
    type Output = Tensor;

    fn index(&self, index: usize) -> &Tensor {
        &self.inner[index]
    }
}

impl<'a> IntoIterator for &'a Outputs {
    type Item = &'a Tensor;
    type IntoIter = std::slice::Iter<'a, Tensor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<Tensor> for Outputs {
    fn from_iter<T: IntoIterator<Item = Tensor>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

/// Input tensors for one inference pass.
#[derive(Debug)]
pub struct Inputs {
    inner: TVec<Tensor>,
}

impl Inputs {
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl From<Tensor> for Inputs {
    fn from(t: Tensor) -> Self {
        Self { inner: tvec![t] }
    }
}

impl FromIterator<Tensor> for Inputs {
    fn from_iter<T: IntoIterator<Item = Tensor>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use tract_onnx::prelude::DatumExt;

    use super::*;
    use crate::image::{Image, Rect};

    /// A network that outputs its single input unchanged.
    fn identity(shape: &[usize]) -> NeuralNetwork {
        let mut model = TypedModel::default();
        let input = model.add_source("input", f32::fact(shape.to_vec())).unwrap();
        model.set_output_outlets(&[input]).unwrap();
        NeuralNetwork::from_graph(model).unwrap()
    }

    #[test]
    fn detect_layout() {
        assert_eq!(
            CnnInputShape::detect(&[1, 3, 224, 224]),
            Some(CnnInputShape::NCHW)
        );
        assert_eq!(
            CnnInputShape::detect(&[1, 192, 192, 3]),
            Some(CnnInputShape::NHWC)
        );
        assert_eq!(
            CnnInputShape::detect(&[1, 3, 3, 3]),
            Some(CnnInputShape::NCHW)
        );
        assert_eq!(CnnInputShape::detect(&[1, 4, 192, 192]), None);
        assert_eq!(CnnInputShape::detect(&[2, 3, 192, 192]), None);
        assert_eq!(CnnInputShape::detect(&[3, 192, 192]), None);
    }

    #[test]
    fn nhwc_cnn() {
        let mapper = ColorMapper::linear(0.0..=1.0);
        let cnn = Cnn::with_detected_layout(identity(&[1, 8, 6, 3]), mapper).unwrap();
        assert_eq!(cnn.input_shape(), CnnInputShape::NHWC);
        assert_eq!(cnn.input_resolution(), Resolution::new(6, 8));

        let mut image = Image::new(12, 16);
        image.clear(Color::RED);
        assert_eq!(cnn.image_to_tensor(&image).shape(), &[1, 8, 6, 3]);

        let outputs = cnn.estimate(&image).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].shape(), &[1, 8, 6, 3]);
        assert_eq!(outputs[0].index([0, 7, 5]).as_slice(), &[1.0, 0.0, 0.0]);
    }

    #[test]
    fn nchw_cnn() {
        let mapper = ColorMapper::linear(0.0..=1.0);
        let cnn = Cnn::with_detected_layout(identity(&[1, 3, 8, 6]), mapper).unwrap();
        assert_eq!(cnn.input_shape(), CnnInputShape::NCHW);
        assert_eq!(cnn.input_resolution(), Resolution::new(6, 8));

        let mut image = Image::new(6, 8);
        image.clear(Color::GREEN);
        let tensor = cnn.image_to_tensor(&image);
        assert_eq!(tensor.shape(), &[1, 3, 8, 6]);
        for y in 0..8 {
            assert!(tensor.index([0, 1, y]).as_slice().iter().all(|&v| v == 1.0));
            assert!(tensor.index([0, 0, y]).as_slice().iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn rejects_non_image_input() {
        let mapper = ColorMapper::linear(0.0..=1.0);
        let err = Cnn::with_detected_layout(identity(&[1, 8, 8, 4]), mapper.clone())
            .err()
            .unwrap();
        assert!(err.to_string().contains("NHWC"), "{err}");

        let nhwc = identity(&[1, 8, 8, 3]);
        assert!(Cnn::new(nhwc, CnnInputShape::NCHW, mapper).is_err());
    }

    #[test]
    fn color_mapper() {
        let mapper = ColorMapper::linear(-1.0..=1.0);
        assert_eq!(mapper.map(Color::BLACK), [-1.0, -1.0, -1.0]);
        assert_eq!(mapper.map(Color::WHITE), [1.0, 1.0, 1.0]);

        let mapper = ColorMapper::linear(0.0..=1.0);
        assert_eq!(mapper.map(Color::RED), [1.0, 0.0, 0.0]);
        assert_eq!(mapper.map(Color::NULL), [0.0, 0.0, 0.0]);
    }

    #[test]
    #[should_panic(expected = "empty color range")]
    fn empty_color_range() {
        ColorMapper::linear(1.0..=1.0);
    }

    #[test]
    fn rejects_non_onnx_path() {
        let err = NeuralNetwork::from_path("model.tflite").err().unwrap();
        assert!(err.to_string().contains(".onnx"), "{err}");
        assert!(NeuralNetwork::from_path("/nonexistent/palm.onnx").is_err());
        assert!(NeuralNetwork::from_onnx(b"garbage".to_vec()).load().is_err());
    }

    #[test]
    fn sample_stretches() {
        let mut image = Image::new(4, 2);
        image.clear(Color::BLACK);
        let mut right = image.view_mut(Rect::from_top_left(2.0, 0.0, 2.0, 2.0));
        for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
            right.set(x, y, Color::WHITE);
        }

        let view = image.as_view();
        assert_eq!(sample_nearest(&view, 0.5, 0.5), Color::BLACK);
        assert_eq!(sample_nearest(&view, 3.5, 1.5), Color::WHITE);
    }
}
