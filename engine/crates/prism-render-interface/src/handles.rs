use slotmap::new_key_type;

new_key_type! {
    pub struct GfxBufferHandle;
    pub struct GfxImageHandle;
    pub struct GfxImageViewHandle;
    pub struct GfxMeshHandle;
    pub struct GfxMaterialHandle;
}
