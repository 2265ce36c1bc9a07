//! Text templates for the render service's scene and config files.
//!
//! The render service consumes plain property files; placeholder tokens of
//! the form `@NAME@` are substituted verbatim. Per-object blocks are stamped
//! once per scanned object with a numeric id.

/// Render configuration template: output resolution and convergence
/// threshold.
pub(crate) const RENDER_CFG_TEMPLATE: &str = "\
renderengine.type = \"PATHCPU\"
sampler.type = \"SOBOL\"
film.width = @WIDTH_OUTPUT@
film.height = @HEIGHT_OUTPUT@
film.imagepipelines.0.0.type = \"NOP\"
film.outputs.0.type = \"RGB_IMAGEPIPELINE\"
film.outputs.0.filename = \"image.exr\"
batch.haltthreshold = @MAX_ERROR@
";

/// Scene template: orthographic camera, emitter panel and detector screen.
pub(crate) const SCENE_TEMPLATE: &str = "\
scene.camera.type = \"orthographic\"
scene.camera.lookat.orig = @CAM_POS@
scene.camera.lookat.target = @CAM_TARGET@
scene.camera.cliphither = @CAM_NEAR@
scene.camera.clipyon = @CAM_FAR@
scene.camera.screenwindow = @SCREEN_BOUNDS@
scene.camera.fieldofview = @FIELD_OF_VIEW@
scene.materials.light_mat.type = \"matte\"
scene.materials.light_mat.kd = 0.0 0.0 0.0
scene.materials.light_mat.emission = 1.0 1.0 1.0
scene.materials.light_mat.emission.power = @POWER@
scene.materials.light_mat.emission.spread.angle = @COLLIMATION@
scene.materials.screen_mat.type = \"matte\"
scene.materials.screen_mat.kd = 1.0 1.0 1.0
scene.objects.light.ply = @AREA_LIGHT_PLY@
scene.objects.light.material = light_mat
scene.objects.screen.ply = @SCREEN_PLY@
scene.objects.screen.material = screen_mat
";

/// Per-object block: a null-surface mesh wrapping a clear interior volume
/// whose absorption carries the band-averaged attenuation triple.
pub(crate) const OBJECT_TEMPLATE: &str = "\
scene.textures.absorption_@ID@.type = \"constfloat3\"
scene.textures.absorption_@ID@.value = @ABSORPTION@
scene.volumes.volume_@ID@.type = \"clear\"
scene.volumes.volume_@ID@.absorption = \"absorption_@ID@\"
scene.materials.material_@ID@.type = \"null\"
scene.materials.material_@ID@.volume.interior = \"volume_@ID@\"
scene.objects.object_@ID@.ply = @OBJECT_PLY@
scene.objects.object_@ID@.material = \"material_@ID@\"
";

/// Substitute `@TOKEN@` placeholders verbatim.
pub(crate) fn substitute(template: &str, replacements: &[(&str, String)]) -> String {
    let mut text = template.to_string();
    for (token, value) in replacements {
        text = text.replace(token, value);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitution_is_verbatim() {
        let out = substitute(
            "a = @X@\nb = @Y@ @X@\n",
            &[("@X@", "1 2 3".to_string()), ("@Y@", "q".to_string())],
        );
        assert_eq!(out, "a = 1 2 3\nb = q 1 2 3\n");
    }

    #[test]
    fn test_render_cfg_tokens_cover_template() {
        let out = substitute(
            RENDER_CFG_TEMPLATE,
            &[
                ("@WIDTH_OUTPUT@", "64".to_string()),
                ("@HEIGHT_OUTPUT@", "48".to_string()),
                ("@MAX_ERROR@", "0.05".to_string()),
            ],
        );
        assert!(!out.contains('@'), "unsubstituted token in: {out}");
    }

    #[test]
    fn test_object_template_ids() {
        let out = substitute(
            OBJECT_TEMPLATE,
            &[
                ("@ID@", "2".to_string()),
                ("@ABSORPTION@", "0.1 0.2 0.3".to_string()),
                ("@OBJECT_PLY@", "object_2.ply".to_string()),
            ],
        );
        assert!(out.contains("scene.objects.object_2.ply = object_2.ply"));
        assert!(out.contains("absorption_2.value = 0.1 0.2 0.3"));
        assert!(!out.contains('@'));
    }
}
