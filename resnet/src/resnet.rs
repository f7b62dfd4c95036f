use tch::nn;

// ResNet-18: two basic blocks per stage
const STAGE_BLOCKS: [i64; 4] = [2, 2, 2, 2];
const STAGE_CHANNELS: [i64; 4] = [64, 128, 256, 512];
const STEM_CHANNELS: i64 = 64;
const IN_CHANNELS: i64 = 3;


fn conv2d(
    vs: nn::Path,
    c_in: i64,
    c_out: i64,
    kernel_size: i64,
    stride: i64,
    padding: i64
    ) -> nn::Conv2D {

    let conv2d_cfg = nn::ConvConfig {
        stride,
        padding,
        bias: false,
        ..Default::default()
    };
    nn::conv2d(vs, c_in, c_out, kernel_size, conv2d_cfg)
}



fn downsample(
    vs: nn::Path,
    c_in: i64,
    c_out: i64,
    stride: i64
    ) -> nn::SequentialT {

    if stride != 1 || c_in != c_out {
        nn::seq_t()
            .add(conv2d(&vs / 0, c_in, c_out, 1, stride, 0))
            .add(nn::batch_norm2d(&vs / 1, c_out, Default::default()))
    }
    else {
        nn::seq_t()
    }
}



fn basic_block(
    vs: nn::Path,
    c_in: i64,
    c_out: i64,
    stride: i64
    ) -> impl nn::ModuleT {

    let conv1 = conv2d(&vs / "conv1", c_in, c_out, 3, stride, 1);
    let bn1   = nn::batch_norm2d(&vs / "bn1", c_out, Default::default());
    let conv2 = conv2d(&vs / "conv2", c_out, c_out, 3, 1, 1);
    let bn2   = nn::batch_norm2d(&vs / "bn2", c_out, Default::default());
    let downsample = downsample(&vs / "downsample", c_in, c_out, stride);

    nn::func_t(move |xs, train| {
        let ys = xs.apply(&conv1)
                   .apply_t(&bn1, train)
                   .relu()
                   .apply(&conv2)
                   .apply_t(&bn2, train);
        (xs.apply_t(&downsample, train) + ys).relu()
    })
}


fn stage(
    vs: nn::Path,
    c_in: i64,
    c_out: i64,
    stride: i64,
    num_blocks: i64
    ) -> nn::SequentialT {

    let mut blocks = nn::seq_t().add(basic_block(&vs / 0, c_in, c_out, stride));
    for block_idx in 1..num_blocks {
        blocks = blocks.add(basic_block(&vs / block_idx, c_out, c_out, 1));
    }
    blocks
}


/// ImageNet-shaped ResNet with a fresh `fc` head of `num_classes` outputs.
/// Variables are laid out as `conv1`, `bn1`, `layer{1..4}`, `fc`.
fn resnet(
    vs: &nn::Path,
    stage_blocks: [i64; 4],
    num_classes: i64
    ) -> nn::FuncT<'static> {
    let conv1 = conv2d(vs / "conv1", IN_CHANNELS, STEM_CHANNELS, 7, 2, 3);
    let bn1   = nn::batch_norm2d(vs / "bn1", STEM_CHANNELS, Default::default());

    let mut layers = nn::seq_t();
    let mut c_in = STEM_CHANNELS;
    for (idx, (&n_blocks, &c_out)) in stage_blocks.iter().zip(STAGE_CHANNELS.iter()).enumerate() {
        let stride = if idx == 0 { 1 } else { 2 };
        layers = layers.add(stage(vs / format!("layer{}", idx + 1), c_in, c_out, stride, n_blocks));
        c_in = c_out;
    }

    let fc = nn::linear(vs / "fc", c_in, num_classes, Default::default());

    nn::func_t(move |xs, train| {
        xs.apply(&conv1)
          .apply_t(&bn1, train)
          .relu()
          .max_pool2d(&[3, 3], &[2, 2], &[1, 1], &[1, 1], false)
          .apply_t(&layers, train)
          .adaptive_avg_pool2d(&[1, 1])
          .flatten(1, -1)
          .apply(&fc)
    })
}


pub fn resnet18(vs: &nn::Path, num_classes: i64) -> nn::FuncT<'static> {
    resnet(vs, STAGE_BLOCKS, num_classes)
}
