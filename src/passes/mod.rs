//! Multi-pass effects
//!
//! Each effect owns its framebuffers and programs, and most of them are
//! [`TextureSource`](crate::shader::TextureSource)s for their result so a
//! later pass can register them on a [`TextureRegistry`](crate::resources::TextureRegistry).
//!
//! | Effect                          | Output sampler                  |
//! |---------------------------------|---------------------------------|
//! | [`PingPongPass`]                | `qrk_pingPongOutput`            |
//! | [`BloomPass`] / [`BloomBuffer`] | `qrk_bloom` / `qrk_bloomMipChain` |
//! | [`EquirectCubemapConverter`]    | `qrk_cubemap`                   |
//! | [`CubemapIrradianceCalculator`] | `qrk_irradianceMap`             |
//! | [`GgxPrefilteredEnvMapCalculator`] | `qrk_ggxPrefilteredEnvMap`   |
//! | [`GgxBrdfIntegrationCalculator`]   | `qrk_brdfLUT`                |
//! | [`SsaoBuffer`]                  | `qrk_ssao`                      |
//! | [`GBuffer`]                     | `gPositionAO`, `gNormalRoughness`, `gAlbedoMetallic`, `gEmission` |

pub mod bloom;
pub mod blur;
pub mod cubemap;
pub mod deferred;
pub mod ibl;
pub mod ssao;

pub use bloom::{BloomBuffer, BloomDownsampleShader, BloomPass, BloomUpsampleShader};
pub use blur::PingPongPass;
pub use cubemap::{
    CubemapRenderHelper, EquirectCubemapConverter, EquirectCubemapShader, cube_face_projection,
    cube_face_views,
};
pub use deferred::{DeferredGeometryPassShader, GBUFFER_SAMPLERS, GBuffer};
pub use ibl::{
    CubemapIrradianceCalculator, CubemapIrradianceShader, GgxBrdfIntegrationCalculator,
    GgxBrdfIntegrationShader, GgxPrefilterShader, GgxPrefilteredEnvMapCalculator,
    prefilter_roughness,
};
pub use ssao::{
    MAX_SSAO_KERNEL_SIZE, SsaoBlurShader, SsaoBuffer, SsaoKernel, SsaoSettings, SsaoShader,
};
